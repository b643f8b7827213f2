//! Anlage SO report generation.
//!
//! Produces the per-disposal rows required for the German private-sales
//! form: acquisition and disposal dates, EUR proceeds, cost basis, fees
//! and gain/loss, plus whether the holding period was exceeded.
//! Exported as CSV (comma-separated, UTF-8, quoted strings), JSON, and
//! a plain-text summary with yearly totals and the Freigrenze verdict.
//! Supporting documentation must be retained 10 years (§147 AO).

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::fmt::Write as _;
use std::io;
use tracing::info;

use crate::error::Result;
use crate::ledger::FifoLedger;

/// Annual Freigrenze for private sales.
pub const FREIGRENZE_EUR: Decimal = dec!(1000);

/// One Anlage SO row per disposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisposalRow {
    pub asset_type: &'static str,
    pub qty_btc: Decimal,
    pub acquisition_date: String,
    pub disposal_date: String,
    pub proceeds_eur: Decimal,
    pub cost_basis_eur: Decimal,
    pub fees_eur: Decimal,
    pub gain_loss_eur: Decimal,
    pub holding_exceeded: bool,
    pub lot_id: String,
    pub disposal_id: String,
}

/// Summary of tax-relevant activity for one year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnnualSummary {
    pub year: i32,
    pub total_disposals: usize,
    pub taxable_disposals: usize,
    pub tax_free_disposals: usize,
    pub total_proceeds_eur: Decimal,
    pub total_cost_basis_eur: Decimal,
    pub total_fees_eur: Decimal,
    pub taxable_gain_eur: Decimal,
    pub taxable_loss_eur: Decimal,
    pub net_taxable_eur: Decimal,
    pub within_freigrenze: bool,
}

/// Report generator over a (read-only) ledger.
pub struct TaxReport<'a> {
    ledger: &'a FifoLedger,
}

impl<'a> TaxReport<'a> {
    #[must_use]
    pub fn new(ledger: &'a FifoLedger) -> Self {
        Self { ledger }
    }

    /// Summary statistics for a tax year. The Freigrenze verdict is
    /// inclusive: a net taxable figure of exactly 1000.00 stays exempt.
    #[must_use]
    pub fn annual_summary(&self, year: i32) -> AnnualSummary {
        let disposals: Vec<_> = self.ledger.disposals_in_year(year).collect();

        let taxable: Vec<_> = disposals.iter().filter(|d| d.is_taxable).collect();
        let net_taxable: Decimal = taxable.iter().map(|d| d.gain_loss_eur).sum();

        AnnualSummary {
            year,
            total_disposals: disposals.len(),
            taxable_disposals: taxable.len(),
            tax_free_disposals: disposals.len() - taxable.len(),
            total_proceeds_eur: disposals.iter().map(|d| d.proceeds_eur).sum(),
            total_cost_basis_eur: disposals.iter().map(|d| d.cost_basis_eur).sum(),
            total_fees_eur: disposals
                .iter()
                .filter(|d| d.eur_usd_rate_at_sale > Decimal::ZERO)
                .map(|d| d.sale_fee_usd_portion / d.eur_usd_rate_at_sale)
                .sum(),
            taxable_gain_eur: taxable
                .iter()
                .filter(|d| d.gain_loss_eur > Decimal::ZERO)
                .map(|d| d.gain_loss_eur)
                .sum(),
            taxable_loss_eur: taxable
                .iter()
                .filter(|d| d.gain_loss_eur < Decimal::ZERO)
                .map(|d| d.gain_loss_eur)
                .sum(),
            net_taxable_eur: net_taxable,
            within_freigrenze: net_taxable <= FREIGRENZE_EUR,
        }
    }

    /// Per-disposal rows for a year, in disposal order.
    #[must_use]
    pub fn rows(&self, year: i32) -> Vec<DisposalRow> {
        self.ledger
            .disposals_in_year(year)
            .map(|d| {
                let acquisition = self
                    .ledger
                    .lot(d.lot_id)
                    .map(|l| l.purchased_at.format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                let fees_eur = if d.eur_usd_rate_at_sale > Decimal::ZERO {
                    d.sale_fee_usd_portion / d.eur_usd_rate_at_sale
                } else {
                    Decimal::ZERO
                };
                DisposalRow {
                    asset_type: "Bitcoin",
                    qty_btc: d.qty_btc.inner(),
                    acquisition_date: acquisition,
                    disposal_date: d.disposed_at.format("%Y-%m-%d").to_string(),
                    proceeds_eur: d.proceeds_eur.round_dp(2),
                    cost_basis_eur: d.cost_basis_eur.round_dp(2),
                    fees_eur: fees_eur.round_dp(2),
                    gain_loss_eur: d.gain_loss_eur.round_dp(2),
                    holding_exceeded: !d.is_taxable,
                    lot_id: d.lot_id.to_string(),
                    disposal_id: d.disposal_id.to_string(),
                }
            })
            .collect()
    }

    /// Write the CSV export for a year.
    pub fn write_csv<W: io::Write>(&self, year: i32, writer: W) -> Result<()> {
        let mut w = csv::WriterBuilder::new()
            .quote_style(csv::QuoteStyle::NonNumeric)
            .from_writer(writer);
        let rows = self.rows(year);
        for row in &rows {
            w.serialize(row)?;
        }
        w.flush().map_err(io::Error::from)?;
        info!(year, rows = rows.len(), "Anlage SO CSV written");
        Ok(())
    }

    /// Write the JSON export (array of rows) for a year.
    pub fn write_json<W: io::Write>(&self, year: i32, writer: W) -> Result<()> {
        serde_json::to_writer_pretty(writer, &self.rows(year))?;
        Ok(())
    }

    /// Plain-text summary with yearly totals and the Freigrenze verdict.
    #[must_use]
    pub fn summary_text(&self, year: i32) -> String {
        let s = self.annual_summary(year);
        let mut out = String::new();
        let _ = writeln!(out, "Tax report {}", s.year);
        let _ = writeln!(out, "{}", "=".repeat(40));
        let _ = writeln!(out, "Total disposals:    {}", s.total_disposals);
        let _ = writeln!(out, "  Taxable:          {}", s.taxable_disposals);
        let _ = writeln!(out, "  Tax-free (>1yr):  {}", s.tax_free_disposals);
        let _ = writeln!(out, "Proceeds (EUR):     {:.2}", s.total_proceeds_eur);
        let _ = writeln!(out, "Cost basis (EUR):   {:.2}", s.total_cost_basis_eur);
        let _ = writeln!(out, "Fees (EUR):         {:.2}", s.total_fees_eur);
        let _ = writeln!(out, "Taxable gains:      {:.2}", s.taxable_gain_eur);
        let _ = writeln!(out, "Taxable losses:     {:.2}", s.taxable_loss_eur);
        let _ = writeln!(out, "Net taxable:        {:.2}", s.net_taxable_eur);
        let _ = writeln!(
            out,
            "Within Freigrenze:  {} (<= EUR {})",
            if s.within_freigrenze { "YES" } else { "NO" },
            FREIGRENZE_EUR
        );
        out
    }
}
