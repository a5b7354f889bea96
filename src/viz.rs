//! Dashboard aggregates and charts using Plotters

use crate::data::{ChurnLabel, ReportRecord};
use crate::error::ChurnError;
use crate::schema::{categorical_index, CATEGORICAL_COLUMNS, MONTHLY_CHARGES, TENURE};
use plotters::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

const RETAINED_COLOR: RGBColor = RGBColor(31, 119, 180);
const CHURNED_COLOR: RGBColor = RGBColor(214, 39, 40);

/// Headline figures of the dashboard
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChurnKpis {
    pub customers: usize,
    /// Share of churned customers, in percent
    pub churn_rate: f64,
    /// Mean `TotalCharges` over customers where it is known
    pub lifetime_value: f64,
    /// Mean tenure in months
    pub mean_tenure: f64,
}

/// Compute the headline figures
pub fn kpis(records: &[ReportRecord]) -> ChurnKpis {
    let customers = records.len();
    let churned = records.iter().filter(|r| r.churn == ChurnLabel::Yes).count();

    ChurnKpis {
        customers,
        churn_rate: if customers == 0 {
            0.0
        } else {
            churned as f64 / customers as f64 * 100.0
        },
        lifetime_value: mean(records.iter().filter_map(|r| r.features.total_charges())),
        mean_tenure: mean(records.iter().filter_map(|r| r.features.tenure())),
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Churned customers per category of `column`, largest first
///
/// Every vocabulary value is listed, including those with no churners.
pub fn churned_by(records: &[ReportRecord], column: &str) -> crate::Result<Vec<(&'static str, usize)>> {
    let idx = categorical_index(column)
        .ok_or_else(|| ChurnError::Schema(format!("'{column}' is not a categorical column")))?;

    let mut counts: Vec<(&'static str, usize)> = CATEGORICAL_COLUMNS[idx]
        .vocabulary
        .iter()
        .map(|value| (*value, 0))
        .collect();

    for record in records.iter().filter(|r| r.churn == ChurnLabel::Yes) {
        if let Some(value) = record.features.categorical[idx] {
            if let Some(entry) = counts.iter_mut().find(|(v, _)| *v == value) {
                entry.1 += 1;
            }
        }
    }

    counts.sort_by(|a, b| b.1.cmp(&a.1));
    Ok(counts)
}

/// Retained and churned customers per category of `column`, in vocabulary order
///
/// Each entry is `(value, retained, churned)`.
pub fn churn_breakdown(
    records: &[ReportRecord],
    column: &str,
) -> crate::Result<Vec<(&'static str, usize, usize)>> {
    let idx = categorical_index(column)
        .ok_or_else(|| ChurnError::Schema(format!("'{column}' is not a categorical column")))?;

    let mut counts: Vec<(&'static str, usize, usize)> = CATEGORICAL_COLUMNS[idx]
        .vocabulary
        .iter()
        .map(|value| (*value, 0, 0))
        .collect();

    for record in records {
        let Some(value) = record.features.categorical[idx] else {
            continue;
        };
        if let Some(entry) = counts.iter_mut().find(|(v, _, _)| *v == value) {
            match record.churn {
                ChurnLabel::No => entry.1 += 1,
                ChurnLabel::Yes => entry.2 += 1,
            }
        }
    }

    Ok(counts)
}

/// Equal-width histogram split by churn label
#[derive(Debug, Clone, PartialEq)]
pub struct ChurnHistogram {
    /// `bins + 1` bin edges
    pub edges: Vec<f64>,
    pub retained: Vec<usize>,
    pub churned: Vec<usize>,
}

impl ChurnHistogram {
    pub fn bins(&self) -> usize {
        self.retained.len()
    }
}

/// Histogram of numeric column `numeric_idx`; missing cells are skipped
pub fn churn_histogram(records: &[ReportRecord], numeric_idx: usize, bins: usize) -> ChurnHistogram {
    let bins = bins.max(1);
    let values: Vec<(f64, ChurnLabel)> = records
        .iter()
        .filter_map(|r| r.features.numeric.get(numeric_idx).copied().flatten().map(|v| (v, r.churn)))
        .collect();

    let low = values.iter().map(|(v, _)| *v).fold(f64::INFINITY, f64::min);
    let high = values.iter().map(|(v, _)| *v).fold(f64::NEG_INFINITY, f64::max);
    let (low, high) = if values.is_empty() {
        (0.0, 1.0)
    } else if high > low {
        (low, high)
    } else {
        (low, low + 1.0)
    };

    let width = (high - low) / bins as f64;
    let edges = (0..=bins).map(|i| low + width * i as f64).collect();
    let mut retained = vec![0; bins];
    let mut churned = vec![0; bins];

    for (value, label) in values {
        // the top edge belongs to the last bin
        let bin = (((value - low) / width) as usize).min(bins - 1);
        match label {
            ChurnLabel::Yes => churned[bin] += 1,
            ChurnLabel::No => retained[bin] += 1,
        }
    }

    ChurnHistogram {
        edges,
        retained,
        churned,
    }
}

/// Bar chart of churned customers per category
pub fn create_churn_bar_chart(
    counts: &[(&'static str, usize)],
    title: &str,
    output_path: &Path,
) -> crate::Result<()> {
    let max_count = counts.iter().map(|(_, c)| *c).max().unwrap_or(1).max(1) as f64;
    let n = counts.len().max(1) as f64;

    let root = BitMapBackend::new(output_path, (800, 500)).into_drawing_area();
    root.fill(&WHITE).map_err(ChurnError::plot)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 28))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(-0.5f64..(n - 0.5), 0f64..(max_count * 1.1))
        .map_err(ChurnError::plot)?;

    let label_for = |x: &f64| {
        let idx = x.round();
        if (x - idx).abs() < 1e-6 && idx >= 0.0 {
            counts.get(idx as usize).map(|(v, _)| v.to_string()).unwrap_or_default()
        } else {
            String::new()
        }
    };
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(counts.len())
        .x_label_formatter(&label_for)
        .y_desc("Churned customers")
        .axis_desc_style(("sans-serif", 15))
        .draw()
        .map_err(ChurnError::plot)?;

    chart
        .draw_series(counts.iter().enumerate().map(|(i, (_, count))| {
            let x = i as f64;
            Rectangle::new([(x - 0.4, 0.0), (x + 0.4, *count as f64)], CHURNED_COLOR.filled())
        }))
        .map_err(ChurnError::plot)?;

    root.present().map_err(ChurnError::plot)?;
    Ok(())
}

/// Side-by-side churn/no-churn histogram
pub fn create_histogram_chart(
    histogram: &ChurnHistogram,
    title: &str,
    x_desc: &str,
    output_path: &Path,
) -> crate::Result<()> {
    let low = histogram.edges.first().copied().unwrap_or(0.0);
    let high = histogram.edges.last().copied().unwrap_or(1.0);
    let max_count = histogram
        .retained
        .iter()
        .chain(histogram.churned.iter())
        .copied()
        .max()
        .unwrap_or(1)
        .max(1) as f64;

    let root = BitMapBackend::new(output_path, (800, 500)).into_drawing_area();
    root.fill(&WHITE).map_err(ChurnError::plot)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 28))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(low..high, 0f64..(max_count * 1.1))
        .map_err(ChurnError::plot)?;

    chart
        .configure_mesh()
        .x_desc(x_desc)
        .y_desc("Customers")
        .axis_desc_style(("sans-serif", 15))
        .draw()
        .map_err(ChurnError::plot)?;

    let halves = |counts: &[usize], right: bool| -> Vec<(f64, f64, f64)> {
        histogram
            .edges
            .windows(2)
            .zip(counts)
            .map(|(edge, &count)| {
                let mid = (edge[0] + edge[1]) / 2.0;
                if right {
                    (mid, edge[1], count as f64)
                } else {
                    (edge[0], mid, count as f64)
                }
            })
            .collect()
    };

    for (counts, right, color, label) in [
        (&histogram.retained, false, RETAINED_COLOR, "No churn"),
        (&histogram.churned, true, CHURNED_COLOR, "Churn"),
    ] {
        chart
            .draw_series(
                halves(&counts[..], right)
                    .into_iter()
                    .map(move |(x0, x1, y)| Rectangle::new([(x0, 0.0), (x1, y)], color.filled())),
            )
            .map_err(ChurnError::plot)?
            .label(label)
            .legend(move |(x, y)| Rectangle::new([(x, y), (x + 10, y + 10)], color.filled()));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()
        .map_err(ChurnError::plot)?;

    root.present().map_err(ChurnError::plot)?;
    Ok(())
}

/// Columns whose retained/churned split is printed in the report
pub const BREAKDOWN_COLUMNS: [&str; 3] = ["InternetService", "Contract", "PaymentMethod"];

/// Print the headline figures and churn breakdowns to the console
pub fn print_report(
    kpis: &ChurnKpis,
    by_payment: &[(&'static str, usize)],
    by_contract: &[(&'static str, usize)],
    breakdowns: &[(&str, Vec<(&'static str, usize, usize)>)],
) {
    println!("\n=== Churn Overview ===");
    println!("Customers:            {}", kpis.customers);
    println!("Churn rate:           {:.2}%", kpis.churn_rate);
    println!("Lifetime value (avg): {:.2}", kpis.lifetime_value);
    println!("Mean tenure (months): {:.1}", kpis.mean_tenure);

    println!("\nRetention vs churn:");
    println!("  {:<28} {:.2}%", "Retained", 100.0 - kpis.churn_rate);
    println!("  {:<28} {:.2}%", "Churned", kpis.churn_rate);

    for (title, counts) in [("Payment method", by_payment), ("Contract", by_contract)] {
        println!("\nChurned customers by {}:", title.to_lowercase());
        for (value, count) in counts {
            println!("  {:<28} {}", value, count);
        }
    }

    for (column, counts) in breakdowns {
        println!("\n{column}: retained / churned");
        for (value, retained, churned) in counts {
            println!("  {:<28} {:>6} {:>6}", value, retained, churned);
        }
    }
}

/// Compute the dashboard aggregates, print them, and render every chart into `output_dir`
///
/// # Returns
/// * Paths of the written PNG files
pub fn generate_report(records: &[ReportRecord], output_dir: &Path, bins: usize) -> crate::Result<Vec<PathBuf>> {
    fs::create_dir_all(output_dir)?;

    let kpis = kpis(records);
    let by_payment = churned_by(records, "PaymentMethod")?;
    let by_contract = churned_by(records, "Contract")?;
    let breakdowns = BREAKDOWN_COLUMNS
        .iter()
        .map(|&column| Ok((column, churn_breakdown(records, column)?)))
        .collect::<crate::Result<Vec<_>>>()?;
    print_report(&kpis, &by_payment, &by_contract, &breakdowns);

    let payment_path = output_dir.join("churn_by_payment_method.png");
    create_churn_bar_chart(&by_payment, "Churn by Payment Method", &payment_path)?;

    let contract_path = output_dir.join("churn_by_contract.png");
    create_churn_bar_chart(&by_contract, "Churn by Contract", &contract_path)?;

    let tenure_path = output_dir.join("tenure_histogram.png");
    create_histogram_chart(
        &churn_histogram(records, TENURE, bins),
        "Tenure by Churn",
        "Tenure (months)",
        &tenure_path,
    )?;

    let monthly_path = output_dir.join("monthly_charges_histogram.png");
    create_histogram_chart(
        &churn_histogram(records, MONTHLY_CHARGES, bins),
        "Monthly Charges by Churn",
        "Monthly charges",
        &monthly_path,
    )?;

    let written = vec![payment_path, contract_path, tenure_path, monthly_path];
    info!(charts = written.len(), dir = %output_dir.display(), "report charts written");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::CustomerRecord;
    use crate::schema::test_row;

    fn report_records() -> Vec<ReportRecord> {
        let rows = [
            ("Month-to-month", "Electronic check", 1.0, 70.0, Some(70.0), ChurnLabel::Yes),
            ("Month-to-month", "Electronic check", 3.0, 90.0, Some(270.0), ChurnLabel::Yes),
            ("Month-to-month", "Mailed check", 0.0, 20.0, None, ChurnLabel::Yes),
            ("Two year", "Bank transfer (automatic)", 60.0, 50.0, Some(3000.0), ChurnLabel::No),
            ("One year", "Credit card (automatic)", 20.0, 30.0, Some(600.0), ChurnLabel::No),
        ];

        rows.iter()
            .enumerate()
            .map(|(i, &(contract, payment, tenure, monthly, total, churn))| CustomerRecord {
                customer_id: format!("C{i}"),
                features: test_row(contract, payment, tenure, monthly, total),
                churn,
            })
            .collect()
    }

    #[test]
    fn test_kpis() {
        let kpis = kpis(&report_records());
        assert_eq!(kpis.customers, 5);
        assert!((kpis.churn_rate - 60.0).abs() < 1e-12);
        assert!((kpis.lifetime_value - 985.0).abs() < 1e-12);
        assert!((kpis.mean_tenure - 16.8).abs() < 1e-12);
    }

    #[test]
    fn test_kpis_of_empty_table() {
        let kpis = kpis(&[]);
        assert_eq!(kpis.customers, 0);
        assert_eq!(kpis.churn_rate, 0.0);
    }

    #[test]
    fn test_churned_by_counts_only_churners() {
        let counts = churned_by(&report_records(), "Contract").unwrap();
        assert_eq!(counts[0], ("Month-to-month", 3));
        assert_eq!(counts.len(), 3);
        assert!(counts[1..].iter().all(|(_, c)| *c == 0));

        let counts = churned_by(&report_records(), "PaymentMethod").unwrap();
        assert_eq!(counts[0], ("Electronic check", 2));
        assert_eq!(counts[1], ("Mailed check", 1));

        assert!(churned_by(&report_records(), "tenure").is_err());
    }

    #[test]
    fn test_churn_breakdown_splits_retained_and_churned() {
        let records = report_records();
        let by_contract = churn_breakdown(&records, "Contract").unwrap();
        assert_eq!(
            by_contract,
            vec![("Month-to-month", 0, 3), ("One year", 1, 0), ("Two year", 1, 0)]
        );

        let by_payment = churn_breakdown(&records, "PaymentMethod").unwrap();
        let total: usize = by_payment.iter().map(|(_, r, c)| r + c).sum();
        assert_eq!(total, records.len());
        assert!(by_payment.contains(&("Electronic check", 0, 2)));

        for column in BREAKDOWN_COLUMNS {
            let counts = churn_breakdown(&records, column).unwrap();
            let churned: usize = counts.iter().map(|(_, _, c)| c).sum();
            assert_eq!(churned, 3, "{column}");
        }
        assert!(churn_breakdown(&records, "MonthlyCharges").is_err());
    }

    #[test]
    fn test_churn_histogram() {
        let histogram = churn_histogram(&report_records(), TENURE, 3);
        assert_eq!(histogram.bins(), 3);
        assert_eq!(histogram.edges, vec![0.0, 20.0, 40.0, 60.0]);
        assert_eq!(histogram.churned, vec![3, 0, 0]);
        // 20.0 opens the second bin, 60.0 closes the last one
        assert_eq!(histogram.retained, vec![0, 1, 1]);
    }

    #[test]
    fn test_churn_histogram_constant_column() {
        let records: Vec<ReportRecord> = report_records()
            .into_iter()
            .map(|mut r| {
                r.features.numeric[MONTHLY_CHARGES] = Some(42.0);
                r
            })
            .collect();
        let histogram = churn_histogram(&records, MONTHLY_CHARGES, 4);
        let total: usize = histogram.retained.iter().chain(&histogram.churned).sum();
        assert_eq!(total, 5);
    }
}
