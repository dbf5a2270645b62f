use std::error::Error;
use voxlive::audio::{list_devices, DeviceKind};

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let devices = list_devices("voxlive-devices")?;
    if devices.is_empty() {
        println!("No audio devices found!");
        return Ok(());
    }

    for (heading, kinds) in [
        ("Inputs (VOXLIVE_INPUT_DEVICE)", &[DeviceKind::Microphone, DeviceKind::Monitor][..]),
        ("Outputs (VOXLIVE_OUTPUT_DEVICE)", &[DeviceKind::Output][..]),
    ] {
        println!("{}:", heading);
        for (i, device) in devices
            .iter()
            .filter(|d| kinds.contains(&d.kind))
            .enumerate()
        {
            println!("{}: {} ({})", i + 1, device.description, device.kind.as_str());
            println!("   Name: {}", device.name);
            println!(
                "   Rate: {} Hz, Channels: {}",
                device.sample_rate, device.channels
            );
        }
        println!();
    }
    Ok(())
}
