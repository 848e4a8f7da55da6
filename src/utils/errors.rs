use ariadne::{Color, Label, Report, ReportKind, Source};
use colored::Colorize;

use crate::analysis::AnalyzedFile;
use crate::diagnostics::{Diagnostic, Severity};

fn report_kind(severity: Severity) -> ReportKind<'static> {
    match severity {
        Severity::Error => ReportKind::Error,
        Severity::Warning => ReportKind::Warning,
        Severity::Info => ReportKind::Advice,
    }
}

fn color(severity: Severity) -> Color {
    match severity {
        Severity::Error => Color::Red,
        Severity::Warning => Color::Yellow,
        Severity::Info => Color::Cyan,
    }
}

/// Character range of a byte span, clamped to the source.
fn char_range(source: &str, start: usize, len: usize) -> std::ops::Range<usize> {
    let clamp = |offset: usize| {
        let mut offset = offset.min(source.len());
        while !source.is_char_boundary(offset) {
            offset -= 1;
        }
        source[..offset].chars().count()
    };
    clamp(start)..clamp(start + len)
}

/// Prints diagnostics to stderr, with source snippets where the file is known.
pub fn emit_diagnostics(diagnostics: &[Diagnostic], files: &[AnalyzedFile]) {
    for diagnostic in diagnostics {
        let severity = diagnostic.severity();
        let file = diagnostic.location.as_ref().and_then(|location| {
            files
                .iter()
                .find(|file| file.display_path == location.file)
                .map(|file| (location, file))
        });

        let Some((location, file)) = file else {
            let label = match severity {
                Severity::Error => "error".red().bold(),
                Severity::Warning => "warning".yellow().bold(),
                Severity::Info => "info".cyan().bold(),
            };
            match &diagnostic.location {
                Some(location) => eprintln!(
                    "{label}[{}]: {} ({location})",
                    diagnostic.id,
                    diagnostic.message()
                ),
                None => eprintln!("{label}[{}]: {}", diagnostic.id, diagnostic.message()),
            }
            continue;
        };

        let source_id = location.file.clone();
        let span = char_range(&file.source, location.span.start(), location.span.len());
        let message = diagnostic.message();
        let report = Report::build(report_kind(severity), source_id.clone(), span.start)
            .with_code(diagnostic.id.code())
            .with_message(&message)
            .with_label(
                Label::new((source_id.clone(), span))
                    .with_message(&message)
                    .with_color(color(severity)),
            )
            .with_note("Re-run with --debug for per-call details.")
            .finish();

        let _ = report.eprint((source_id, Source::from(&*file.source)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_spans_become_character_ranges() {
        let source = "let é = T::f(1);";
        let start = source.find('T').expect("call");
        assert_eq!(char_range(source, start, 7), 8..15);
        assert_eq!(char_range(source, 500, 3), 16..16);
    }
}
