use log::warn;
use sigcore::dmm::DmmKind;
use std::io::{self, BufRead};

/// Reads one hex-encoded DMM packet per line from stdin and prints the
/// decoded reading:
///
/// ```text
/// echo '2b 31 32 33 34 20 32 40 30 32 30 30 0d 0a' | siglab-dmmcat fs9922
/// ```
fn main() {
    env_logger::init();
    let name = std::env::args()
        .nth(1)
        .expect("usage: siglab-dmmcat <fs9721|fs9922|metex14|es51922>");
    let Some(kind) = DmmKind::from_name(&name) else {
        eprintln!("unknown protocol {name:?}");
        std::process::exit(2);
    };

    for line in io::stdin().lock().lines() {
        let line = line.expect("stdin");
        if line.trim().is_empty() {
            continue;
        }
        let Some(bytes) = parse_hex(&line) else {
            warn!("not a hex packet: {line:?}");
            continue;
        };
        if bytes.len() != kind.packet_size() {
            warn!(
                "{} byte packet, {} expects {}",
                bytes.len(),
                kind.name(),
                kind.packet_size()
            );
            continue;
        }
        if !kind.packet_valid(&bytes) {
            warn!("packet failed {} validity check", kind.name());
            continue;
        }
        match kind.parse(&bytes) {
            Ok(r) => println!(
                "{} {:?} ({:?}) flags {:?}",
                r.value, r.unit, r.quantity, r.flags
            ),
            Err(e) => warn!("parse failed: {e}"),
        }
    }
}

fn parse_hex(line: &str) -> Option<Vec<u8>> {
    line.split_whitespace()
        .map(|tok| u8::from_str_radix(tok, 16).ok())
        .collect()
}
