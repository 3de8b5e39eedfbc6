use color_eyre::eyre::Result;
use qrcode::{QrCode, render::unicode};

/// Print `data` as a QR code using half-height unicode blocks, with a
/// label above it.
pub fn print_qr(data: &str, label: &str) -> Result<()> {
    let code = QrCode::new(data)?;
    let rendered = code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .build();
    println!("{}:\n{}", label, rendered);
    Ok(())
}
