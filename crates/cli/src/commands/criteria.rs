//! Somatic cell count criteria listing

use anyhow::Result;
use tabled::Tabled;

use crate::client::{ApiClient, CriteriaListing};
use crate::output::{color_named, print_info, print_json, print_table, OutputFormat};

#[derive(Tabled)]
struct CriterionRow {
    #[tabled(rename = "Class")]
    class: u8,
    #[tabled(rename = "Label")]
    label: String,
    #[tabled(rename = "Range")]
    range: String,
    #[tabled(rename = "Description")]
    description: String,
    #[tabled(rename = "Action")]
    action: String,
}

/// Show the SCC classification table
pub async fn show_criteria(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let listing: CriteriaListing = client.get("ai/mastitis/scc/criteria").await?;

    match format {
        OutputFormat::Json => print_json(&listing)?,
        OutputFormat::Table => {
            let rows: Vec<CriterionRow> = listing
                .entries()
                .into_iter()
                .map(|(label, entry)| CriterionRow {
                    class: entry.class,
                    label: color_named(&entry.color, &label),
                    range: format!("{} {}", entry.range, listing.unit),
                    description: entry.description,
                    action: entry.action,
                })
                .collect();
            print_table(&rows);
            for note in &listing.notes {
                print_info(note);
            }
            for reference in &listing.references {
                println!("  - {}", reference);
            }
        }
    }

    Ok(())
}
