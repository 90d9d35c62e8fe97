//! Line-oriented parser for the textual output of a sync invocation.
//!
//! Parsing is table driven: [`RULES`] is an ordered list of line shapes,
//! each paired with a handler that updates [`SyncStatistics`]. Every line
//! is tried against the rules in order and the first match wins.
//! Unrecognized lines are ignored so new tool output never breaks a run.
//!
//! Numeric captures that don't fit a `u64` leave the counter unchanged and
//! record a warning instead.

use std::sync::LazyLock;

use b2_mirror_models::SyncStatistics;
use regex::{Captures, Regex};

type Handler = fn(&Captures<'_>, &str, &mut SyncStatistics);

struct Rule {
    pattern: Regex,
    handler: Handler,
}

impl Rule {
    fn new(pattern: &str, handler: Handler) -> Self {
        Self {
            pattern: Regex::new(pattern).expect("valid regex"),
            handler,
        }
    }
}

/// Which counter a numeric capture feeds.
#[derive(Clone, Copy)]
enum Counter {
    Uploaded,
    Skipped,
    Deleted,
    Bytes,
}

impl Counter {
    const fn slot(self, stats: &mut SyncStatistics) -> &mut u64 {
        match self {
            Self::Uploaded => &mut stats.files_uploaded,
            Self::Skipped => &mut stats.files_skipped,
            Self::Deleted => &mut stats.files_deleted,
            Self::Bytes => &mut stats.bytes_transferred,
        }
    }
}

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        // Markers first so "ERROR: upload failed ..." never counts as an upload.
        Rule::new(r"(?i)^(?:error|fatal)(?:\s*:|\s)", |_, line, stats| {
            stats.record_error(line);
        }),
        Rule::new(r"(?i)^warn(?:ing)?(?:\s*:|\s)", |_, line, stats| {
            stats.record_warning(line);
        }),
        // Summary lines: "uploaded 12 files", "skipped 3 files", ...
        Rule::new(r"(?i)^(?:uploaded|updated)\s+(\S+)\s+files?\b", |caps, line, stats| {
            add_capture(caps, line, stats, Counter::Uploaded);
        }),
        Rule::new(r"(?i)^skipped\s+(\S+)\s+files?\b", |caps, line, stats| {
            add_capture(caps, line, stats, Counter::Skipped);
        }),
        Rule::new(r"(?i)^deleted\s+(\S+)\s+files?\b", |caps, line, stats| {
            add_capture(caps, line, stats, Counter::Deleted);
        }),
        Rule::new(
            r"(?i)^(?:transferred|sent|total)\s*:?\s+(\S+)\s+bytes\b",
            |caps, line, stats| add_capture(caps, line, stats, Counter::Bytes),
        ),
        // Per-file action lines: "upload: a.jpg -> b2://bucket/a.jpg" or
        // "upload a.jpg".
        Rule::new(r"(?i)^(?:upload|update|copy)\s*:?\s+\S", |_, line, stats| {
            add_one(line, stats, Counter::Uploaded);
        }),
        Rule::new(r"(?i)^skip\s*:?\s+\S", |_, line, stats| {
            add_one(line, stats, Counter::Skipped);
        }),
        Rule::new(r"(?i)^(?:delete|hide)\s*:?\s+\S", |_, line, stats| {
            add_one(line, stats, Counter::Deleted);
        }),
    ]
});

/// Parses the complete output of one sync invocation.
///
/// Empty input yields all-zero counters and a successful exit status. The
/// result depends only on `raw`, so parsing the same text twice is
/// identical.
#[must_use]
pub fn parse_sync_output(raw: &str) -> SyncStatistics {
    let mut stats = SyncStatistics::default();

    // Progress redraws use bare carriage returns.
    for line in raw.split(['\n', '\r']) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some((rule, caps)) = RULES
            .iter()
            .find_map(|rule| rule.pattern.captures(line).map(|caps| (rule, caps)))
        {
            (rule.handler)(&caps, line, &mut stats);
        } else {
            log::trace!("Ignoring sync output line: {line}");
        }
    }

    stats
}

fn add_capture(caps: &Captures<'_>, line: &str, stats: &mut SyncStatistics, counter: Counter) {
    let raw = caps.get(1).map_or("", |m| m.as_str());
    match raw.replace([',', '_'], "").parse::<u64>() {
        Ok(n) => add(line, stats, counter, n),
        Err(e) => stats.record_warning(format!("Unparseable count {raw:?} ({e}) in line: {line}")),
    }
}

fn add_one(line: &str, stats: &mut SyncStatistics, counter: Counter) {
    add(line, stats, counter, 1);
}

fn add(line: &str, stats: &mut SyncStatistics, counter: Counter, n: u64) {
    let slot = counter.slot(stats);
    if let Some(sum) = slot.checked_add(n) {
        *slot = sum;
    } else {
        stats.record_warning(format!("Counter overflow in line: {line}"));
    }
}
