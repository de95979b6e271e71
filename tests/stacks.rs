//! Whole stacks decoded from synthesized waveforms

use pdstack::nodes::decoders::cc1101::CC1101;
use pdstack::nodes::decoders::{
    CanConfig, CanDecoder, CanFrame, Cc1101Decoder, Cc1101Packet, EthernetDecoder, FourBFiveBDecoder, I2cConfig, I2cDecoder,
    I2cTransaction, I2cTransactionDecoder, Ipv4Decoder, LinConfig, LinDecoder, LinFrame,
    LinVersion, NrziConfig, NrziDecoder, SpiConfig, SpiDecoder, UartConfig, UartDecoder,
    UdpDatagram, UdpDecoder,
};
use pdstack::runtime::{AnnotationLog, DecoderStack, PacketCollector, SampleRange};
use pdstack::runtime::Spanned;
use pdstack::synth::{
    SignalBuilder, SpiPins, can_frame_bits, ethernet_frame, fourb_fiveb_stream, ipv4_udp,
};

const BIT: u64 = 10;

fn lin_stack(config: LinConfig) -> DecoderStack {
    DecoderStack::new(UartDecoder::new(UartConfig::default().with_baudrate(100)))
        .with_samplerate(1000)
        .stack(LinDecoder::new(config))
        .unwrap()
}

fn lin_frame(signal: &mut SignalBuilder, bytes: &[u8]) {
    let config = UartConfig::default();
    signal.uart_break(0, 13, BIT);
    signal.hold(BIT);
    for &byte in bytes {
        signal.uart(0, &config, BIT, u16::from(byte));
    }
    signal.hold(3 * BIT);
}

fn udp_stack() -> DecoderStack {
    DecoderStack::new(NrziDecoder::new(NrziConfig::default().with_bitrate(100)))
        .with_samplerate(1000)
        .stack(FourBFiveBDecoder::new())
        .unwrap()
        .stack(EthernetDecoder::new())
        .unwrap()
        .stack(Ipv4Decoder::new())
        .unwrap()
        .stack(UdpDecoder::new())
        .unwrap()
}

/// Each range starts after the previous one ends
fn assert_ordered<T>(packets: &[Spanned<T>]) {
    for pair in packets.windows(2) {
        assert!(
            pair[0].range.end() <= pair[1].range.start(),
            "{} overlaps {}",
            pair[0].range,
            pair[1].range
        );
    }
}

#[test]
fn test_udp_over_ethernet_over_nrzi() {
    let payload = b"hello";
    let datagram = ipv4_udp([192, 168, 1, 10], [192, 168, 1, 20], 4000, 9000, payload);
    let frame = ethernet_frame([0xFF; 6], [0x02, 0, 0, 0, 0, 0x42], 0x0800, &datagram);
    let stream = fourb_fiveb_stream(&frame, 4, 4);

    let mut signal = SignalBuilder::new(1);
    signal.hold(25);
    signal.nrzi(0, &stream.bits, BIT);
    signal.hold(200);
    let capture = signal.into_capture();

    let mut stack = udp_stack();
    let mut log = AnnotationLog::new();
    let mut collector = PacketCollector::<UdpDatagram>::new();
    let report = stack
        .run_with_tap(capture.samples(), &mut log, &mut collector)
        .unwrap();
    assert!(report.is_clean(), "{:?}", report);

    let datagrams = collector.into_packets();
    assert_eq!(datagrams.len(), 1);
    let udp = &datagrams[0].value;
    assert_eq!(udp.source_port, 4000);
    assert_eq!(udp.destination_port, 9000);
    assert_eq!(udp.checksum_valid, Some(true));
    assert_eq!(udp.payload_bytes(), payload.to_vec());

    // Each byte is two code groups of five bits; the payload follows the
    // J/K pair, preamble, SFD, Ethernet, IPv4 and UDP headers
    let frame_start = 25 + stream.frame.start as u64 * BIT;
    let first = frame_start + 10 * BIT + (8 + 14 + 20 + 8) * 10 * BIT;
    assert_eq!(udp.payload[0].range, SampleRange::new(first, first + 10 * BIT));

    assert!(log.contains_text("eth", "EtherType: IPv4 (0x0800)"));
    assert!(log.contains_text("ipv4", "Source: 192.168.1.10"));
    assert!(log.contains_text("udp", "Payload (5 bytes): 68 65 6C 6C 6F"));
    for stage in ["nrzi", "4b5b", "eth", "ipv4", "udp"] {
        assert!(report.stage(stage).is_some(), "missing stage {}", stage);
    }
}

#[test]
fn test_udp_ranges_are_ordered() {
    let mut signal = SignalBuilder::new(1);
    signal.hold(25);
    for (port, payload) in [(1000, &b"first"[..]), (1001, &b"second"[..]), (1002, &b"third"[..])] {
        let datagram = ipv4_udp([10, 0, 0, 1], [10, 0, 0, 2], port, 53, payload);
        let frame = ethernet_frame([0xFF; 6], [0x02, 0, 0, 0, 0, 0x01], 0x0800, &datagram);
        signal.nrzi(0, &fourb_fiveb_stream(&frame, 4, 4).bits, BIT);
    }
    signal.hold(200);
    let capture = signal.into_capture();

    let mut collector = PacketCollector::<UdpDatagram>::new();
    let report = udp_stack()
        .run_with_tap(capture.samples(), &mut AnnotationLog::new(), &mut collector)
        .unwrap();
    assert!(report.is_clean(), "{:?}", report);

    let datagrams = collector.into_packets();
    let ports: Vec<u16> = datagrams.iter().map(|d| d.value.source_port).collect();
    assert_eq!(ports, vec![1000, 1001, 1002]);
    assert_ordered(&datagrams);
    for datagram in &datagrams {
        assert_ordered(&datagram.value.payload);
        let first = datagram.value.payload[0].range;
        assert!(datagram.range.start() < first.start() && first.end() <= datagram.range.end());
    }
}

#[test]
fn test_can_ranges_are_ordered() {
    const CAN_BIT: u64 = 10;
    let mut signal = SignalBuilder::new(1);
    signal.set(0, true).hold(50);
    let frames = [
        can_frame_bits(0x100, false, false, &[1]),
        can_frame_bits(0x1ABCDE, true, false, &[2, 3]),
        can_frame_bits(0x7FF, false, true, &[]),
    ];
    for bits in &frames {
        signal.bits(0, bits, CAN_BIT);
        signal.set(0, true).hold(3 * CAN_BIT);
    }
    signal.hold(100);
    let capture = signal.into_capture();

    let mut stack = DecoderStack::new(CanDecoder::new(CanConfig::default().with_bitrate(100)))
        .with_samplerate(1000);
    let mut log = AnnotationLog::new();
    let mut collector = PacketCollector::<CanFrame>::new();
    let report = stack
        .run_with_tap(capture.samples(), &mut log, &mut collector)
        .unwrap();
    assert!(report.is_clean(), "{:?}", report);

    let decoded = collector.into_packets();
    let ids: Vec<u32> = decoded.iter().map(|f| f.value.id).collect();
    assert_eq!(ids, vec![0x100, 0x1ABCDE, 0x7FF]);
    assert!(decoded.iter().all(|f| f.value.crc_valid && f.value.acked));
    assert_ordered(&decoded);
    assert!(log.contains_text("can", "Extended frame 0x001ABCDE: 02 03"));
}

#[test]
fn test_lin_over_uart() {
    let mut signal = SignalBuilder::new(1);
    signal.set(0, true).hold(30);
    lin_frame(&mut signal, &[0x55, 0x50, 0x01, 0x02, 0x03, 0xA9]);
    // A wrong checksum in the second frame
    lin_frame(&mut signal, &[0x55, 0x50, 0x01, 0x02, 0x03, 0xAA]);
    // The next break closes the second frame
    lin_frame(&mut signal, &[]);
    signal.hold(100);
    let capture = signal.into_capture();

    let mut stack = lin_stack(LinConfig::default());
    let mut log = AnnotationLog::new();
    let mut collector = PacketCollector::<LinFrame>::new();
    let report = stack
        .run_with_tap(capture.samples(), &mut log, &mut collector)
        .unwrap();
    assert!(report.is_clean(), "{:?}", report);

    let frames = collector.into_packets();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].range.start(), 30);
    assert_eq!(frames[0].value.id, 0x10);
    assert_eq!(frames[0].value.data, vec![1, 2, 3]);
    assert!(frames[0].value.enhanced);
    assert!(frames[0].value.checksum_valid);
    assert!(!frames[1].value.checksum_valid);
    assert!(log.contains_text("lin", "Checksum mismatch: expected 0xA9"));
}

#[test]
fn test_lin_classic_checksum() {
    let mut signal = SignalBuilder::new(1);
    signal.set(0, true).hold(30);
    lin_frame(&mut signal, &[0x55, 0x50, 0x01, 0x02, 0x03, 0xF9]);
    lin_frame(&mut signal, &[]);
    signal.hold(100);
    let capture = signal.into_capture();

    let mut stack = lin_stack(LinConfig::default().with_version(LinVersion::V1));
    let mut log = AnnotationLog::new();
    let mut collector = PacketCollector::<LinFrame>::new();
    stack
        .run_with_tap(capture.samples(), &mut log, &mut collector)
        .unwrap();
    let frames: Vec<&LinFrame> = collector.values().collect();
    assert_eq!(frames.len(), 1);
    assert!(!frames[0].enhanced);
    assert!(frames[0].checksum_valid);
}

#[test]
fn test_cc1101_over_spi() {
    let pins = SpiPins {
        cs: Some(0),
        clk: 1,
        mosi: 2,
        miso: Some(3),
    };
    let mut signal = SignalBuilder::new(4);
    signal.set(0, true).hold(20);
    // SRES strobe, then a write to FREQ2 and one to an unassigned address
    signal.spi(pins, &[(0x30, 0x0F)], 8, 5);
    signal.hold(20);
    signal.spi(pins, &[(0x0D, 0x0F), (0x21, 0x0F)], 8, 5);
    signal.hold(20);
    signal.spi(pins, &[(0x2F, 0x0F), (0xAB, 0x0F)], 8, 5);
    signal.hold(20);
    let capture = signal.into_capture();

    let mut stack = DecoderStack::new(SpiDecoder::new(SpiConfig::default()))
        .stack(Cc1101Decoder::default())
        .unwrap();
    let mut log = AnnotationLog::new();
    let mut collector = PacketCollector::<Cc1101Packet>::new();
    let report = stack
        .run_with_tap(capture.samples(), &mut log, &mut collector)
        .unwrap();
    assert!(report.is_clean(), "{:?}", report);

    let packets: Vec<&Cc1101Packet> = collector.values().collect();
    assert_eq!(packets.len(), 3);
    assert!(matches!(packets[0], Cc1101Packet::Strobe { name, .. } if name == "SRES"));
    let Cc1101Packet::Access(freq) = packets[1] else {
        panic!("expected an access, got {:?}", packets[1]);
    };
    assert_eq!(freq.register, "FREQ2");
    assert_eq!(freq.data, vec![0x21]);
    assert!(log.contains_text(CC1101, "Write Unknown (0x2F): 0xAB"));
}

#[test]
fn test_i2c_transactions() {
    const SCL: usize = 0;
    const SDA: usize = 1;
    const HALF: u64 = 5;

    let mut signal = SignalBuilder::new(2);
    signal.set(SCL, true).set(SDA, true).hold(20);
    // Register pointer write, then a repeated START read of two bytes
    signal.i2c_start(SCL, SDA, HALF);
    signal.i2c_byte(SCL, SDA, 0x50 << 1, true, HALF);
    signal.i2c_byte(SCL, SDA, 0x10, true, HALF);
    signal.i2c_start(SCL, SDA, HALF);
    signal.i2c_byte(SCL, SDA, (0x50 << 1) | 1, true, HALF);
    signal.i2c_byte(SCL, SDA, 0xCA, true, HALF);
    signal.i2c_byte(SCL, SDA, 0xFE, false, HALF);
    signal.i2c_stop(SCL, SDA, HALF);
    signal.hold(20);
    let capture = signal.into_capture();

    let mut stack = DecoderStack::new(I2cDecoder::new(I2cConfig::default()))
        .stack(I2cTransactionDecoder::new())
        .unwrap();
    let mut log = AnnotationLog::new();
    let mut collector = PacketCollector::<I2cTransaction>::new();
    stack
        .run_with_tap(capture.samples(), &mut log, &mut collector)
        .unwrap();

    let transactions = collector.into_packets();
    assert_eq!(transactions.len(), 2);
    assert!(!transactions[0].value.read);
    assert_eq!(transactions[0].value.bytes(), vec![0x10]);
    assert!(transactions[1].value.read);
    assert_eq!(transactions[1].value.bytes(), vec![0xCA, 0xFE]);
    assert!(transactions[1].value.address_acked);
    assert!(!transactions[1].value.all_acked);
    assert!(transactions[0].range.end() <= transactions[1].range.start() + 1);
    assert!(log.contains_text("i2c_transaction", "Read from 0x50: CA FE"));
}
