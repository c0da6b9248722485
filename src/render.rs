use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use tracing::warn;

use crate::error::{Error, Result};
use crate::models::{Customer, Invoice};

/// Configured template collaborator. When none is installed (or the
/// configured one fails) the renderer falls back to its built-in
/// layout, so a document can always be produced.
pub trait InvoiceTemplate: Send + Sync {
    fn render(&self, invoice: &Invoice, customer: &Customer) -> Result<String>;
}

/// Renders invoices to HTML and, pandoc permitting, PDF.
pub struct InvoiceRenderer {
    output_dir: PathBuf,
    template: Option<Arc<dyn InvoiceTemplate>>,
}

impl InvoiceRenderer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self> {
        let output_dir = output_dir.into();
        if !output_dir.exists() {
            fs::create_dir_all(&output_dir).map_err(|e| Error::Render(e.to_string()))?;
        }

        Ok(Self {
            output_dir,
            template: None,
        })
    }

    pub fn with_template(mut self, template: Arc<dyn InvoiceTemplate>) -> Self {
        self.template = Some(template);
        self
    }

    /// HTML document for the invoice: the configured template when one
    /// renders successfully, the built-in layout otherwise.
    pub fn render_html(&self, invoice: &Invoice, customer: &Customer) -> String {
        if let Some(template) = &self.template {
            match template.render(invoice, customer) {
                Ok(html) => return html,
                Err(e) => {
                    warn!(invoice = %invoice.number, error = %e, "configured template failed, using built-in layout");
                }
            }
        }
        builtin_layout(invoice, customer)
    }

    /// Produce document bytes for attachment. Writes the HTML next to
    /// the crate's other output and shells out to pandoc for the PDF;
    /// when pandoc is unavailable or fails, the HTML bytes themselves
    /// are returned so sending can still proceed.
    pub fn render_pdf(&self, invoice: &Invoice, customer: &Customer) -> Result<Vec<u8>> {
        let html = self.render_html(invoice, customer);

        let stem = invoice.number.replace('/', "-");
        let html_path = self.output_dir.join(format!("invoice_{stem}.html"));
        let pdf_path = self.output_dir.join(format!("invoice_{stem}.pdf"));

        fs::write(&html_path, &html).map_err(|e| Error::Render(e.to_string()))?;

        match convert_with_pandoc(&html_path, &pdf_path) {
            Ok(()) => fs::read(&pdf_path).map_err(|e| Error::Render(e.to_string())),
            Err(e) => {
                warn!(invoice = %invoice.number, error = %e, "pdf conversion failed, attaching html");
                Ok(html.into_bytes())
            }
        }
    }
}

fn convert_with_pandoc(html_path: &Path, pdf_path: &Path) -> Result<()> {
    let output = Command::new("pandoc")
        .arg(html_path)
        .arg("-o")
        .arg(pdf_path)
        .output()
        .map_err(|e| Error::Render(format!("could not run pandoc: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Render(format!("pandoc failed: {stderr}")));
    }

    Ok(())
}

/// Minimal inline-styled layout, always available regardless of the
/// template collaborator.
fn builtin_layout(invoice: &Invoice, customer: &Customer) -> String {
    let mut html = String::new();

    html.push_str("<html><body style=\"font-family: sans-serif;\">\n");
    html.push_str("<hr style=\"height: 5px; background-color: #343876; border: none;\">\n");
    html.push_str(&format!("<h1>Invoice {}</h1>\n", invoice.number));
    html.push_str(&format!(
        "<p>Issued {} &middot; Due {}</p>\n",
        invoice.issue_date.format("%Y-%m-%d"),
        invoice.due_date.format("%Y-%m-%d"),
    ));

    html.push_str("<p><strong>Billed to</strong><br>\n");
    html.push_str(&format!("{}", customer.name));
    if let Some(address) = &customer.address {
        html.push_str(&format!("<br>{address}"));
    }
    html.push_str("</p>\n");

    html.push_str("<table style=\"width: 100%; border-collapse: collapse;\">\n");
    html.push_str("<tr>\n");
    html.push_str("<th style=\"text-align: left;\">Description</th>\n");
    html.push_str("<th style=\"text-align: right;\">Quantity</th>\n");
    html.push_str("<th style=\"text-align: right;\">Unit price</th>\n");
    html.push_str("<th style=\"text-align: right;\">Amount</th>\n");
    html.push_str("</tr>\n");

    for item in &invoice.items {
        let amount = item.quantity * item.unit_price;
        html.push_str("<tr>\n");
        html.push_str(&format!(
            "<td style=\"text-align: left;\">{}</td>\n",
            item.description
        ));
        html.push_str(&format!(
            "<td style=\"text-align: right;\">{}</td>\n",
            item.quantity
        ));
        html.push_str(&format!(
            "<td style=\"text-align: right;\">{} {}</td>\n",
            item.unit_price, invoice.currency
        ));
        html.push_str(&format!(
            "<td style=\"text-align: right;\">{} {}</td>\n",
            amount, invoice.currency
        ));
        html.push_str("</tr>\n");
    }

    html.push_str(&format!(
        "<tr><td colspan=\"3\" style=\"text-align: right;\">Subtotal</td>\
         <td style=\"text-align: right;\">{} {}</td></tr>\n",
        invoice.subtotal, invoice.currency
    ));
    html.push_str(&format!(
        "<tr><td colspan=\"3\" style=\"text-align: right;\">Tax ({}%)</td>\
         <td style=\"text-align: right;\">{} {}</td></tr>\n",
        invoice.tax_rate, invoice.tax_amount, invoice.currency
    ));
    html.push_str(&format!(
        "<tr><td colspan=\"3\" style=\"text-align: right;\">Total</td>\
         <td style=\"text-align: right; font-weight: bold; color: #e83e8c;\">{} {}</td></tr>\n",
        invoice.total, invoice.currency
    ));
    html.push_str("</table>\n");

    if let Some(notes) = &invoice.notes {
        html.push_str(&format!("<p>{notes}</p>\n"));
    }

    html.push_str("</body></html>\n");
    html
}
