//! Multiply a few operand pairs on the simulated backend
//!
//! Shows the full write → pipeline → read flow without hardware.

use fpm_chip::codec;
use fpm_driver::{
    ChannelResource, DriverConfig, FpmDevice, Result, SimConfig, SimPlatform,
};
use std::time::Duration;

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter("fpm_driver=info")
        .init();

    println!("🔢 FPM Simulated Multiply\n");

    let mut platform =
        SimPlatform::new(SimConfig::default().with_uniform_latency(Duration::from_micros(200)));
    let mut device = FpmDevice::attach(
        &mut platform,
        &ChannelResource::reference_set(),
        DriverConfig::from_env(),
    )?;

    let request = "2.0, 2.0, 3.0, 1.5, -1.25, 4.0 ";
    println!("📤 Writing {request:?}");
    device.write(request.as_bytes())?;

    println!("\n📥 Results:");
    let mut buffer = [0u8; 64];
    let mut line = Vec::new();
    loop {
        let n = device.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        line.extend_from_slice(&buffer[..n]);
        if line.ends_with(b"\n") {
            let text = String::from_utf8_lossy(&line);
            let word = text
                .trim_end()
                .rsplit("0x")
                .next()
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .unwrap_or_default();
            println!("  {} = {}", text.trim_end(), codec::decode(word));
            line.clear();
        }
    }

    println!(
        "\n✅ {} cycle(s) completed",
        device.controller().cycles_completed()
    );

    Ok(())
}
