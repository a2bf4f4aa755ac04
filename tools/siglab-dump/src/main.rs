use sigfmt::la8::{La8Decoder, La8Options};
use sigfmt::stf::{StfDecoder, StfOptions};
use sigfmt::vcd::{VcdDecoder, VcdOptions};
use sigfmt::{detect, FormatDecoder, FormatKind};
use sigsession::{Capture, FileSource, Packet};
use std::fs;
use std::io::Read;

fn main() {
    env_logger::init();
    let path = std::env::args()
        .nth(1)
        .expect("usage: siglab-dump <capture-file>");

    let mut head = [0u8; 16];
    let n = fs::File::open(&path)
        .and_then(|mut f| f.read(&mut head))
        .unwrap_or_else(|e| {
            eprintln!("cannot read {path}: {e}");
            std::process::exit(1);
        });
    let size = fs::metadata(&path).ok().map(|m| m.len());

    let kind = detect(&head[..n], size);
    let decoder: Box<dyn FormatDecoder> = match kind {
        FormatKind::La8 => Box::new(La8Decoder::new(La8Options::default()).unwrap()),
        FormatKind::Stf => Box::new(StfDecoder::new(StfOptions::default()).unwrap()),
        FormatKind::Vcd => Box::new(VcdDecoder::new(VcdOptions::default()).unwrap()),
    };
    println!("decoding {path} as {kind:?}");

    let mut capture = Capture::new(decoder, Box::new(FileSource::new(&path)), print_packet);
    if let Err(e) = capture.run() {
        eprintln!("decode failed: {e}");
        std::process::exit(1);
    }
}

fn print_packet(packet: &Packet) {
    match packet {
        Packet::Header(h) => println!("header (feed version {})", h.feed_version),
        Packet::Meta(m) => println!("meta {m:?}"),
        Packet::Logic(l) => println!("logic {} units of {} byte(s)", l.num_units(), l.unit_size),
        Packet::Analog(a) => println!(
            "analog {} samples, {:?} in {:?}, flags {:?}",
            a.num_samples, a.quantity, a.unit, a.flags
        ),
        Packet::Trigger => println!("trigger"),
        Packet::FrameBegin => println!("frame begin"),
        Packet::FrameEnd => println!("frame end"),
        Packet::End => println!("end"),
    }
}
