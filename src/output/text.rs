//! Plain-text report.

use std::io::{self, Write};

use bytesize::ByteSize;

use super::{member_size, ScanReport};

/// Renders a [`ScanReport`] as readable text.
#[derive(Debug, Clone, Copy)]
pub struct TextOutput<'a> {
    report: &'a ScanReport,
}

impl<'a> TextOutput<'a> {
    #[must_use]
    pub fn new(report: &'a ScanReport) -> Self {
        Self { report }
    }

    /// Write the group listing followed by the summary.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let report = self.report;
        for (index, group) in report.outcome.groups.iter().enumerate() {
            let short_hash: String = group.hash().chars().take(12).collect();
            writeln!(
                writer,
                "Group {}: {} files of {}, {} reclaimable [{short_hash}]",
                index + 1,
                group.count(),
                ByteSize(member_size(group)),
                ByteSize(group.wasted_space()),
            )?;
            let keep = group.recommended().map(|f| f.id.as_str());
            for file in group.files() {
                let marker = if Some(file.id.as_str()) == keep { "keep" } else { "    " };
                writeln!(writer, "  {marker}  {}", file.path)?;
            }
            writeln!(writer)?;
        }

        for warning in &report.outcome.warnings {
            writeln!(writer, "warning: {warning}")?;
        }
        for failure in &report.hash.failures {
            writeln!(
                writer,
                "failed: {} after {} attempts: {}",
                failure.file_id, failure.attempts, failure.message
            )?;
        }

        let catalog = &report.statistics;
        if let Some(category) = catalog.largest_category() {
            let breakdown: Vec<String> = catalog
                .by_category
                .iter()
                .map(|(kind, totals)| {
                    format!("{} {kind} ({})", totals.files, ByteSize(totals.size))
                })
                .collect();
            writeln!(
                writer,
                "Catalog: {} in {} files, average {}, mostly {category}: {}",
                ByteSize(catalog.total_size),
                catalog.total_files,
                ByteSize(catalog.average_file_size()),
                breakdown.join(", "),
            )?;
        }

        let stats = &report.outcome.stats;
        writeln!(
            writer,
            "Scanned {} files: {} hashed ({}, {}), {} skipped, {} failed",
            catalog.total_files,
            report.hash.hashed,
            ByteSize(report.hash.bytes_hashed),
            report.algorithm,
            report.hash.skipped(),
            report.hash.failed(),
        )?;
        writeln!(
            writer,
            "Found {} duplicate groups, {} duplicate files, {} reclaimable",
            stats.groups,
            stats.duplicate_files,
            ByteSize(stats.wasted_space),
        )
    }

    /// The rendered report as a string.
    #[must_use]
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = self.write_to(&mut buffer);
        String::from_utf8_lossy(&buffer).into_owned()
    }
}
