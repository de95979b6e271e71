//! Example: LIN frames over UART
//!
//! Synthesizes LIN frames (break, sync, protected ID, data, checksum) on one
//! line and decodes them with a UART -> LIN stack.
//!
//! Usage:
//!   cargo run --example lin_bus -- --id 0x10 --data 01,02,03
//!
//! Classic checksums (LIN 1.x):
//!   cargo run --example lin_bus -- --id 0x22 --data AA,BB --classic

use clap::Parser;
use pdstack::nodes::decoders::lin::protected_id;
use pdstack::nodes::decoders::{LinConfig, LinDecoder, LinFrame, LinVersion, UartConfig, UartDecoder};
use pdstack::runtime::checksum::LinChecksum;
use pdstack::runtime::{Annotation, DecoderStack, PacketCollector};
use pdstack::synth::SignalBuilder;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Frame identifier (0-63), decimal or 0x prefixed
    #[arg(long, default_value = "0x10", value_parser = parse_byte)]
    id: u8,

    /// Comma separated data bytes in hex
    #[arg(long, default_value = "01,02,03", value_delimiter = ',', value_parser = parse_hex)]
    data: Vec<u8>,

    /// Baudrate
    #[arg(long, default_value = "19200")]
    baudrate: u64,

    /// Use classic checksums (LIN 1.x)
    #[arg(long)]
    classic: bool,

    /// Number of frames to send
    #[arg(short, long, default_value = "3")]
    n: usize,
}

fn parse_byte(text: &str) -> Result<u8, String> {
    match text.strip_prefix("0x") {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => text.parse(),
    }
    .map_err(|e| e.to_string())
}

fn parse_hex(text: &str) -> Result<u8, String> {
    u8::from_str_radix(text.trim_start_matches("0x"), 16).map_err(|e| e.to_string())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let samples_per_bit = 16;
    let samplerate = args.baudrate * samples_per_bit;
    let id = args.id & 0x3F;
    let pid = protected_id(id);

    let mut checksum = LinChecksum::new();
    if !args.classic {
        checksum.update(&[pid]);
    }
    checksum.update(&args.data);

    info!("=== LIN Bus Example ===");
    info!(
        "ID 0x{:02X} (PID 0x{:02X}), {} data bytes, checksum 0x{:02X}",
        id,
        pid,
        args.data.len(),
        checksum.finish()
    );

    let uart = UartConfig::default().with_baudrate(args.baudrate);
    let mut signal = SignalBuilder::new(1);
    signal.set(0, true).hold(samples_per_bit * 10);
    for _ in 0..args.n {
        signal.uart_break(0, 13, samples_per_bit);
        signal.hold(samples_per_bit);
        let bytes = [0x55, pid]
            .into_iter()
            .chain(args.data.iter().copied())
            .chain([checksum.finish()]);
        for byte in bytes {
            signal.uart(0, &uart, samples_per_bit, u16::from(byte));
        }
        signal.hold(samples_per_bit * 20);
    }
    // A frame has no length field; the next break closes the last one
    signal.uart_break(0, 13, samples_per_bit);
    signal.hold(samples_per_bit * 10);
    let capture = signal.into_capture();

    let version = if args.classic {
        LinVersion::V1
    } else {
        LinVersion::V2
    };
    let mut stack = DecoderStack::new(UartDecoder::new(uart))
        .with_samplerate(samplerate)
        .stack(LinDecoder::new(LinConfig::default().with_version(version)))?;

    let mut sink = |stage: &str, annotation: Annotation| {
        if stage == "lin" {
            info!("[lin] {} {}", annotation.range, annotation.text());
        }
    };
    let mut frames = PacketCollector::<LinFrame>::new();
    let report = stack.run_with_tap(capture.samples(), &mut sink, &mut frames)?;
    info!("Decoded {} frames, clean run: {}", frames.packets().len(), report.is_clean());
    for frame in frames.values() {
        info!(
            "ID 0x{:02X} data {:02X?} checksum {} ({})",
            frame.id,
            frame.data,
            if frame.checksum_valid { "ok" } else { "bad" },
            if frame.enhanced { "enhanced" } else { "classic" }
        );
    }

    Ok(())
}
