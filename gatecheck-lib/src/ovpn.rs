//! Extraction of reproducible connection parameters from an OpenVPN client
//! configuration.

use crate::error::{GateError, Result};
use crate::record::TunnelParams;

/// Extract protocol, port and the inline ca/cert/key blocks from a config.
///
/// The blocks are delimited by `<ca>`/`</ca>` style marker lines. Any
/// missing piece fails the whole candidate.
pub fn parse_params(config: &str) -> Result<TunnelParams> {
    let mut proto = None;
    let mut port = None;
    let mut ca_lines: Vec<&str> = Vec::new();
    let mut cert_lines: Vec<&str> = Vec::new();
    let mut key_lines: Vec<&str> = Vec::new();

    #[derive(PartialEq)]
    enum Block {
        None,
        Ca,
        Cert,
        Key,
    }
    let mut block = Block::None;

    for raw in config.lines() {
        let line = raw.trim_end_matches('\r').trim();
        let mut args = line.split_whitespace();

        match args.next() {
            Some("proto") => proto = args.next().map(str::to_string),
            Some("remote") => {
                // remote <host> <port>
                port = args.nth(1).and_then(|p| p.parse::<u16>().ok());
            }
            Some("<ca>") => block = Block::Ca,
            Some("</ca>") => block = Block::None,
            Some("<cert>") => block = Block::Cert,
            Some("</cert>") => block = Block::None,
            Some("<key>") => block = Block::Key,
            Some("</key>") => block = Block::None,
            Some(_) => match block {
                Block::Ca => ca_lines.push(line),
                Block::Cert => cert_lines.push(line),
                Block::Key => key_lines.push(line),
                Block::None => {}
            },
            None => {}
        }
    }

    let proto = proto.ok_or(GateError::ConfigParse("proto"))?;
    let port = port.ok_or(GateError::ConfigParse("port"))?;
    if ca_lines.is_empty() {
        return Err(GateError::ConfigParse("ca"));
    }
    if cert_lines.is_empty() {
        return Err(GateError::ConfigParse("cert"));
    }
    if key_lines.is_empty() {
        return Err(GateError::ConfigParse("key"));
    }

    Ok(TunnelParams {
        proto,
        port,
        ca: ca_lines.join("\r\n"),
        cert: cert_lines.join("\r\n"),
        key: key_lines.join("\r\n"),
    })
}
