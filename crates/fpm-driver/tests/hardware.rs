//! Hardware validation tests
//!
//! Require the FPM block design loaded on the FPGA, the three AXI-DMA blocks
//! bound to `uio_pdrv_genirq`, and a u-dma-buf named `udmabuf_fpm`.

use fpm_chip::codec;
use fpm_driver::prelude::*;
use fpm_driver::DeviceManager;
use std::io::Read;

fn open_device() -> FpmDevice {
    let mut platform = UioPlatform::new().expect("UIO devices present");
    FpmDevice::attach(
        &mut platform,
        &ChannelResource::reference_set(),
        DriverConfig::from_env(),
    )
    .expect("attach on hardware")
}

#[test]
#[ignore] // Requires hardware
fn test_discovers_all_three_channels() {
    let manager = DeviceManager::discover().expect("UIO devices present");
    for resource in ChannelResource::reference_set() {
        let device = manager
            .find_by_base(resource.base)
            .unwrap_or_else(|| panic!("no UIO device for {}", resource.role));
        println!("{}: uio{} ({})", resource.role, device.index, device.name);
    }
}

#[test]
#[ignore] // Requires hardware
fn test_hardware_multiply() {
    let mut device = open_device();
    device.write(b"2.0, 2.0, 3.0, 1.5 ").expect("write");

    let mut text = String::new();
    device.read_to_string(&mut text).expect("read");
    let words: Vec<u32> = text
        .lines()
        .map(|l| u32::from_str_radix(l.rsplit("0x").next().unwrap(), 16).unwrap())
        .collect();

    assert_eq!(words.len(), 2);
    assert!((codec::decode(words[0]) - 4.0).abs() <= codec::QUANTIZATION_STEP);
    assert!((codec::decode(words[1]) - 4.5).abs() <= codec::QUANTIZATION_STEP);
    println!("✅ Hardware products match: {text}");
}

#[test]
#[ignore] // Requires hardware
fn test_hardware_full_batches() {
    let mut device = open_device();
    for round in 0..3 {
        device.write(b"1, 1, 2, 2, 3, 3, 4, 4, 5, 5").expect("write");
        let mut text = String::new();
        device.read_to_string(&mut text).expect("read");
        assert_eq!(text.lines().count(), 5, "round {round}");
    }
    assert_eq!(device.controller().cycles_completed(), 15);
}
