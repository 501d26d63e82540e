use printpdf::{BuiltinFont, Mm, PdfDocument};

use crate::models::payment::{format_cents, PaymentDetail};

#[derive(thiserror::Error, Debug)]
pub enum ReceiptError {
    #[error("PDF rendering failed: {0}")]
    Render(String),
}

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const LEFT: f32 = 20.0;
const VALUE_COLUMN: f32 = 70.0;

/// Object key under which a payment's receipt is stored
pub fn receipt_key(payment: &PaymentDetail) -> String {
    format!("receipts/{}.pdf", payment.payment.id)
}

/// Download filename offered to the browser
pub fn receipt_file_name(payment: &PaymentDetail) -> String {
    format!("recibo-{}.pdf", short_id(payment))
}

fn short_id(payment: &PaymentDetail) -> String {
    payment.payment.id.simple().to_string()[..8].to_uppercase()
}

/// Renders an A4 payment receipt
pub fn render_receipt(gym_name: &str, payment: &PaymentDetail) -> Result<Vec<u8>, ReceiptError> {
    let title = format!("Recibo {}", short_id(payment));
    let (doc, page, layer) = PdfDocument::new(&title, Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Recibo");

    let regular = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| ReceiptError::Render(e.to_string()))?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|e| ReceiptError::Render(e.to_string()))?;

    let canvas = doc.get_page(page).get_layer(layer);

    canvas.use_text(gym_name, 22.0, Mm(LEFT), Mm(270.0), &bold);
    canvas.use_text("Recibo de pago", 14.0, Mm(LEFT), Mm(260.0), &regular);
    canvas.use_text(
        format!("No. {}", short_id(payment)),
        11.0,
        Mm(PAGE_WIDTH - 70.0),
        Mm(260.0),
        &regular,
    );

    let p = &payment.payment;
    let rows = [
        ("Fecha", p.paid_at.format("%d/%m/%Y %H:%M UTC").to_string()),
        ("Socio", payment.member_name.clone()),
        ("Correo", payment.member_email.clone()),
        (
            "Plan",
            payment.plan_name.clone().unwrap_or_else(|| "-".to_string()),
        ),
        (
            "Concepto",
            p.concept.clone().unwrap_or_else(|| "-".to_string()),
        ),
        ("Forma de pago", p.method.to_string()),
    ];

    let mut y = 240.0;
    for (label, value) in rows.iter() {
        canvas.use_text(*label, 11.0, Mm(LEFT), Mm(y), &bold);
        canvas.use_text(value.as_str(), 11.0, Mm(VALUE_COLUMN), Mm(y), &regular);
        y -= 9.0;
    }

    y -= 6.0;
    canvas.use_text("Total", 14.0, Mm(LEFT), Mm(y), &bold);
    canvas.use_text(
        format!("$ {}", format_cents(p.amount_cents)),
        14.0,
        Mm(VALUE_COLUMN),
        Mm(y),
        &bold,
    );

    canvas.use_text(
        format!("Referencia: {}", p.id),
        8.0,
        Mm(LEFT),
        Mm(20.0),
        &regular,
    );

    doc.save_to_bytes()
        .map_err(|e| ReceiptError::Render(e.to_string()))
}
