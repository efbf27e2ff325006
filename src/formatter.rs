//! Output formatters for decoded files.
//!
//! A [`Report`] collects what the CLI prints: the header summary, every
//! portion with its decode outcome, and the results of offset lookups.
//! Formatters render a report as human-readable text, JSON, or one
//! tab-separated line per item.

use std::fmt::Write as _;
use std::path::Path;

use serde::Serialize;

use crate::bytes::ByteRange;
use crate::cache::{CancelToken, LoadStatus};
use crate::macho::header::{cpu_subtype_name, cpu_type_name};
use crate::macho::MachoFile;
use crate::translation::Translation;

/// Summary of the Mach header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderSummary {
    pub cpu: String,
    pub cpu_subtype: String,
    pub file_type: String,
    pub is_64_bit: bool,
    pub load_commands: u32,
    pub flags: String,
}

/// One portion and how decoding it went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortionSummary {
    pub title: String,
    pub subtitle: Option<String>,
    pub range: ByteRange,
    pub runtime_size: Option<u64>,
    pub status: LoadStatus,
    /// Number of fields, once translated.
    pub fields: Option<usize>,
    /// Fields carrying an inline error.
    pub field_errors: usize,
    pub error: Option<String>,
    /// Every field, when the report was collected with fields.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub translations: Vec<Translation>,
}

/// One offset lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lookup {
    pub offset: u64,
    pub portion: Option<String>,
    pub translation: Option<Translation>,
}

/// Everything a formatter renders for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub header: HeaderSummary,
    pub file_size: usize,
    pub portions: Vec<PortionSummary>,
    pub lookups: Vec<Lookup>,
}

impl Report {
    /// Wait for every portion and run the lookups. `with_fields` keeps
    /// every translation, not just the counts.
    pub fn collect(file: &MachoFile, offsets: &[u64], with_fields: bool, cancel: &CancelToken) -> Self {
        let header = file.header();
        let header = HeaderSummary {
            cpu: cpu_type_name(header.cpu_type),
            cpu_subtype: cpu_subtype_name(header.cpu_type, header.cpu_subtype),
            file_type: header.file_type.to_string(),
            is_64_bit: header.is_64_bit,
            load_commands: header.ncmds,
            flags: header.flags.describe(),
        };

        let portions = file
            .portions()
            .iter()
            .map(|portion| {
                let outcome = portion.await_translate_result(cancel);
                let (fields, field_errors, error, translations) = match &outcome {
                    Ok(translated) => {
                        let all = translated.groups().iter().flat_map(|g| g.translations());
                        let (count, errors) = all.clone().fold((0, 0), |(count, errors), t| {
                            (count + 1, errors + usize::from(t.error.is_some()))
                        });
                        let kept = if with_fields { all.cloned().collect() } else { Vec::new() };
                        (Some(count), errors, None, kept)
                    }
                    Err(err) => (None, 0, Some(err.to_string()), Vec::new()),
                };
                PortionSummary {
                    title: portion.title().to_string(),
                    subtitle: portion.subtitle().map(str::to_string),
                    range: portion.range(),
                    runtime_size: portion.runtime_size(),
                    status: portion.status(),
                    fields,
                    field_errors,
                    error,
                    translations,
                }
            })
            .collect();

        let lookups = offsets
            .iter()
            .map(|&offset| {
                let hit = file.search_by_offset(offset, cancel);
                Lookup {
                    offset,
                    portion: hit.as_ref().map(|hit| hit.portion.title().to_string()),
                    translation: hit.map(|hit| hit.translation),
                }
            })
            .collect();

        Self {
            header,
            file_size: file.len(),
            portions,
            lookups,
        }
    }
}

/// Trait for formatting reports.
///
/// Implementors render each part; the default `format_report`
/// concatenates them.
pub trait ReportFormatter {
    /// Format the file path header.
    fn format_file(&self, path: &Path) -> String;

    /// Format the header summary.
    fn format_header(&self, header: &HeaderSummary) -> Option<String>;

    /// Format the portion list.
    fn format_portions(&self, portions: &[PortionSummary]) -> Option<String>;

    /// Format the lookup results.
    fn format_lookups(&self, lookups: &[Lookup]) -> Option<String>;

    /// Format the complete report.
    fn format_report(&self, report: &Report, path: &Path) -> String {
        let mut parts = vec![self.format_file(path)];
        parts.extend(self.format_header(&report.header));
        parts.extend(self.format_portions(&report.portions));
        parts.extend(self.format_lookups(&report.lookups));
        parts.join("")
    }
}

/// Human-readable output formatter.
#[derive(Debug, Clone, Default)]
pub struct HumanFormatter {
    /// Show decode status and field counts per portion
    pub verbose: bool,
    /// Only print lookups
    pub quiet: bool,
}

impl HumanFormatter {
    /// Create a new human formatter with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a verbose formatter.
    pub fn verbose() -> Self {
        Self {
            verbose: true,
            quiet: false,
        }
    }

    /// Create a quiet formatter.
    pub fn quiet() -> Self {
        Self {
            verbose: false,
            quiet: true,
        }
    }
}

fn describe_translation(translation: &Translation) -> String {
    let mut s = format!(
        "{} {} = {} ({})",
        translation.range,
        translation.label,
        translation.value,
        translation.kind.description()
    );
    if let Some(secondary) = &translation.secondary {
        let _ = write!(s, "; {}: {}", secondary.label, secondary.value);
    }
    if let Some(error) = &translation.error {
        let _ = write!(s, " [error: {error}]");
    }
    s
}

impl ReportFormatter for HumanFormatter {
    fn format_file(&self, path: &Path) -> String {
        if self.quiet {
            String::new()
        } else {
            format!("File: {}\n", path.display())
        }
    }

    fn format_header(&self, header: &HeaderSummary) -> Option<String> {
        if self.quiet {
            return None;
        }
        let mut s = String::new();
        let _ = writeln!(s, "  CPU:        {} ({})", header.cpu, header.cpu_subtype);
        let _ = writeln!(s, "  File Type:  {}", header.file_type);
        let _ = writeln!(s, "  Layout:     {}-bit", if header.is_64_bit { 64 } else { 32 });
        let _ = writeln!(s, "  Commands:   {}", header.load_commands);
        if self.verbose {
            let _ = writeln!(s, "  Flags:      {}", header.flags);
        }
        Some(s)
    }

    fn format_portions(&self, portions: &[PortionSummary]) -> Option<String> {
        if self.quiet || portions.is_empty() {
            return None;
        }
        let mut s = String::from("  Portions:\n");
        for portion in portions {
            let _ = write!(s, "    {:<28} {}", portion.range.to_string(), portion.title);
            if let Some(subtitle) = &portion.subtitle {
                let _ = write!(s, " ({subtitle})");
            }
            if let Some(size) = portion.runtime_size {
                let _ = write!(s, " [runtime size 0x{size:X}]");
            }
            if self.verbose {
                let _ = write!(s, " - {}", portion.status);
                if let Some(fields) = portion.fields {
                    let _ = write!(s, ", {fields} fields");
                }
                if portion.field_errors > 0 {
                    let _ = write!(s, ", {} with errors", portion.field_errors);
                }
            }
            if let Some(error) = &portion.error {
                let _ = write!(s, " [error: {error}]");
            }
            s.push('\n');
            for translation in &portion.translations {
                let _ = writeln!(s, "      {}", describe_translation(translation));
            }
        }
        Some(s)
    }

    fn format_lookups(&self, lookups: &[Lookup]) -> Option<String> {
        if lookups.is_empty() {
            return None;
        }
        let indent = if self.quiet { "" } else { "  " };
        let mut s = String::new();
        for lookup in lookups {
            match (&lookup.portion, &lookup.translation) {
                (Some(portion), Some(translation)) => {
                    let _ = writeln!(
                        s,
                        "{indent}0x{:X}: {portion}: {}",
                        lookup.offset,
                        describe_translation(translation)
                    );
                }
                _ => {
                    let _ = writeln!(s, "{indent}0x{:X}: no field", lookup.offset);
                }
            }
        }
        Some(s)
    }

    fn format_report(&self, report: &Report, path: &Path) -> String {
        let mut parts = vec![self.format_file(path)];
        parts.extend(self.format_header(&report.header));
        parts.extend(self.format_portions(&report.portions));
        parts.extend(self.format_lookups(&report.lookups));
        if !self.quiet {
            parts.push(String::from("\n"));
        }
        parts.join("")
    }
}

/// JSON output formatter.
#[derive(Debug, Clone)]
pub struct JsonFormatter {
    /// Pretty-print JSON
    pub pretty: bool,
}

impl Default for JsonFormatter {
    fn default() -> Self {
        Self { pretty: true }
    }
}

impl JsonFormatter {
    /// Create a new JSON formatter with pretty printing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a compact JSON formatter.
    pub fn compact() -> Self {
        Self { pretty: false }
    }
}

impl ReportFormatter for JsonFormatter {
    fn format_file(&self, _path: &Path) -> String {
        String::new()
    }

    fn format_header(&self, _header: &HeaderSummary) -> Option<String> {
        None
    }

    fn format_portions(&self, _portions: &[PortionSummary]) -> Option<String> {
        None
    }

    fn format_lookups(&self, _lookups: &[Lookup]) -> Option<String> {
        None
    }

    fn format_report(&self, report: &Report, path: &Path) -> String {
        #[derive(Serialize)]
        struct JsonOutput<'a> {
            file: String,
            #[serde(flatten)]
            report: &'a Report,
        }

        let output = JsonOutput {
            file: path.display().to_string(),
            report,
        };
        let mut json = if self.pretty {
            serde_json::to_string_pretty(&output).unwrap_or_else(|_| "{}".to_string())
        } else {
            serde_json::to_string(&output).unwrap_or_else(|_| "{}".to_string())
        };
        json.push('\n');
        json
    }
}

/// Tab-separated output: one line per portion, then one per lookup.
#[derive(Debug, Clone, Default)]
pub struct ShortFormatter;

impl ShortFormatter {
    /// Create a new short formatter.
    pub fn new() -> Self {
        Self
    }
}

impl ReportFormatter for ShortFormatter {
    fn format_file(&self, _path: &Path) -> String {
        String::new()
    }

    fn format_header(&self, _header: &HeaderSummary) -> Option<String> {
        None
    }

    fn format_portions(&self, _portions: &[PortionSummary]) -> Option<String> {
        None
    }

    fn format_lookups(&self, _lookups: &[Lookup]) -> Option<String> {
        None
    }

    fn format_report(&self, report: &Report, path: &Path) -> String {
        let mut s = String::new();
        for portion in &report.portions {
            let _ = writeln!(
                s,
                "{}\t0x{:X}\t{}\t{}\t{}",
                path.display(),
                portion.range.start,
                portion.range.len,
                portion.title,
                portion.status
            );
        }
        for lookup in &report.lookups {
            match &lookup.translation {
                Some(translation) => {
                    let _ = writeln!(
                        s,
                        "{}\t0x{:X}\t{}\t{}\t{}",
                        path.display(),
                        lookup.offset,
                        lookup.portion.as_deref().unwrap_or_default(),
                        translation.label,
                        translation.value
                    );
                }
                None => {
                    let _ = writeln!(s, "{}\t0x{:X}\t-", path.display(), lookup.offset);
                }
            }
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::MachoBuilder;

    fn collect(offsets: &[u64], with_fields: bool) -> Report {
        let mut builder = MachoBuilder::new_64();
        builder.segment("__TEXT", 0x1000, &[("__cstring", 0x2, b"OK\0".to_vec())]);
        let file = MachoFile::parse(builder.build()).unwrap();
        Report::collect(&file, offsets, with_fields, &CancelToken::new())
    }

    fn report(offsets: &[u64]) -> Report {
        collect(offsets, false)
    }

    #[test]
    fn test_verbose_lists_fields() {
        let report = collect(&[], true);
        let strings = &report.portions[2];
        assert_eq!(strings.translations.len(), 1);
        let out = HumanFormatter::verbose().format_report(&report, Path::new("a.out"));
        assert!(out.contains("translated, 1 fields"));
        assert!(out.contains("      [0xB8, 0xBB) String = OK"));
        assert!(out.contains("Flags:"));
    }

    #[test]
    fn test_report_collects_everything() {
        let report = report(&[184, 0xFFFF]);
        assert_eq!(report.portions.len(), 3);
        assert!(report.portions.iter().all(|p| p.status == LoadStatus::Translated));
        assert_eq!(report.lookups[0].portion.as_deref(), Some("__TEXT,__cstring"));
        assert!(report.lookups[1].translation.is_none());
        assert_eq!(report.header.cpu, "x86_64");
    }

    #[test]
    fn test_human_formatter() {
        let report = report(&[184]);
        let out = HumanFormatter::new().format_report(&report, Path::new("a.out"));
        assert!(out.starts_with("File: a.out\n"));
        assert!(out.contains("Mach Header"));
        assert!(out.contains("__TEXT,__cstring: [0xB8, 0xBB) String = OK"));

        let quiet = HumanFormatter::quiet().format_report(&report, Path::new("a.out"));
        assert!(!quiet.contains("Portions"));
        assert!(quiet.starts_with("0xB8: "));
    }

    #[test]
    fn test_json_formatter() {
        let report = report(&[184]);
        let out = JsonFormatter::compact().format_report(&report, Path::new("a.out"));
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["file"], "a.out");
        assert_eq!(value["portions"][0]["title"], "Mach Header");
        assert_eq!(value["lookups"][0]["translation"]["value"], "OK");
    }

    #[test]
    fn test_short_formatter() {
        let report = report(&[184]);
        let out = ShortFormatter::new().format_report(&report, Path::new("a.out"));
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "a.out\t0x0\t32\tMach Header\ttranslated");
        assert_eq!(lines[3], "a.out\t0xB8\t__TEXT,__cstring\tString\tOK");
    }
}
