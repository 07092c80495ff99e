//! CLI output formatting for every command.
//!
//! Every entity follows the same two-level pattern:
//!
//! 1. **Header line**: positional index or id, plus a short status
//! 2. **Context lines**: indented `Source:`, `Raw:`, `Transformed:` and so on
//!
//! All `format_*` functions are pure and return lines, so they can be tested
//! without capturing stdout. The `print_*` wrappers just print them.
//!
//! # Output Format
//!
//! ## Chain
//!
//! ```text
//! Chain OK (2 steps)
//!     001 resize (height=300, width=400)
//!     002 grayscale
//! ```
//!
//! ## Record
//!
//! ```text
//! 6f1c…e2 [processed]
//!     Source: ./photos/cat.png
//!     Raw: raw-images/6f1c…e2.png (image/png)
//!     Transformed: transformed-images/6f1c…e2.png
//!     Checksum: 9a0b…
//!     Steps:
//!         001 rotate (angle=90)
//! ```
//!
//! ## Worker
//!
//! ```text
//! 6f1c…e2 processed → transformed-images/6f1c…e2.png
//! 41aa…07 retrying (attempt 1/3): failed to process image transformations: …
//! 41aa…07 failed: giving up after 3 attempts: …
//! Processed: 1, failed: 1, retried: 2
//! ```

use crate::types::{ImagePage, ImageRecord, TransformationChain, TransformationStep};
use crate::worker::{WorkerEvent, WorkerReport};

// ============================================================================
// Shared helpers
// ============================================================================

/// Format a 1-based position as a zero-padded three-digit index.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// One step as `name (key=value, ...)`, or just the name without config.
fn step_line(step: &TransformationStep) -> String {
    match &step.config {
        Some(config) if !config.is_empty() => {
            let params: Vec<String> = config.iter().map(|(k, v)| format!("{k}={v}")).collect();
            format!("{} ({})", step.name, params.join(", "))
        }
        _ => step.name.clone(),
    }
}

fn chain_lines(chain: &TransformationChain, depth: usize) -> Vec<String> {
    chain
        .steps()
        .iter()
        .enumerate()
        .map(|(i, step)| format!("{}{} {}", indent(depth), format_index(i + 1), step_line(step)))
        .collect()
}

fn plural(count: usize, word: &str) -> String {
    if count == 1 {
        format!("{count} {word}")
    } else {
        format!("{count} {word}s")
    }
}

// ============================================================================
// validate / apply
// ============================================================================

/// Format a chain that passed validation.
pub fn format_chain_ok(chain: &TransformationChain) -> Vec<String> {
    let mut lines = vec![format!("Chain OK ({})", plural(chain.len(), "step"))];
    lines.extend(chain_lines(chain, 1));
    lines
}

pub fn print_chain_ok(chain: &TransformationChain) {
    for line in format_chain_ok(chain) {
        println!("{}", line);
    }
}

/// Summary of a local `apply` run.
pub fn format_apply_output(
    chain: &TransformationChain,
    input_size: usize,
    output_size: usize,
    output: &str,
) -> Vec<String> {
    let mut lines = vec![format!(
        "Applied {} → {}",
        plural(chain.len(), "step"),
        output
    )];
    lines.extend(chain_lines(chain, 1));
    lines.push(format!("{}{} → {} bytes", indent(1), input_size, output_size));
    lines
}

pub fn print_apply_output(
    chain: &TransformationChain,
    input_size: usize,
    output_size: usize,
    output: &str,
) {
    for line in format_apply_output(chain, input_size, output_size, output) {
        println!("{}", line);
    }
}

// ============================================================================
// Records
// ============================================================================

/// Full detail view of one record.
pub fn format_record(record: &ImageRecord) -> Vec<String> {
    let mut lines = vec![format!("{} [{}]", record.id, record.status)];
    let ctx = indent(1);

    lines.push(format!("{ctx}Source: {}", record.original_image_url));
    if !record.object_storage_image_key.is_empty() {
        lines.push(format!(
            "{ctx}Raw: {} ({})",
            record.object_storage_image_key, record.mime_type
        ));
    }
    if !record.transformed_image_key.is_empty() {
        lines.push(format!("{ctx}Transformed: {}", record.transformed_image_key));
    }
    if !record.checksum.is_empty() {
        lines.push(format!("{ctx}Checksum: {}", record.checksum));
    }
    if let Some(error) = &record.error_message {
        lines.push(format!("{ctx}Error: {}", error));
    }
    if record.transformations.is_empty() {
        lines.push(format!("{ctx}Steps: none"));
    } else {
        lines.push(format!("{ctx}Steps:"));
        lines.extend(chain_lines(&record.transformations, 2));
    }
    lines.push(format!(
        "{ctx}Created: {}",
        record.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    lines.push(format!(
        "{ctx}Updated: {}",
        record.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    lines
}

pub fn print_record(record: &ImageRecord) {
    for line in format_record(record) {
        println!("{}", line);
    }
}

/// One line per record, numbered across pages.
pub fn format_page(page: &ImagePage) -> Vec<String> {
    let first = page.page.saturating_sub(1) * page.limit;
    let mut lines = vec![format!(
        "Images (page {}, {} total)",
        page.page,
        page.count
    )];
    if page.data.is_empty() {
        lines.push(format!("{}none", indent(1)));
    }
    for (i, record) in page.data.iter().enumerate() {
        lines.push(format!(
            "{} {} [{}]",
            format_index(first + i + 1),
            record.id,
            record.status
        ));
        lines.push(format!("{}Source: {}", indent(1), record.original_image_url));
    }
    lines
}

pub fn print_page(page: &ImagePage) {
    for line in format_page(page) {
        println!("{}", line);
    }
}

// ============================================================================
// Worker
// ============================================================================

/// Format a single worker progress event as display lines.
pub fn format_worker_event(event: &WorkerEvent) -> Vec<String> {
    match event {
        WorkerEvent::Processed { record, .. } => {
            vec![format!(
                "{} processed → {}",
                record.id, record.transformed_image_key
            )]
        }
        WorkerEvent::Retrying {
            id,
            attempt,
            max_attempts,
            error,
        } => vec![format!(
            "{} retrying (attempt {}/{}): {}",
            id, attempt, max_attempts, error
        )],
        WorkerEvent::Failed { id, error, .. } => vec![format!("{} failed: {}", id, error)],
    }
}

/// One lifecycle transition as broadcast by the notifier.
pub fn format_status_update(record: &ImageRecord) -> String {
    match &record.error_message {
        Some(error) => format!("{} → {} ({})", record.id, record.status, error),
        None => format!("{} → {}", record.id, record.status),
    }
}

pub fn format_worker_report(report: &WorkerReport) -> String {
    format!(
        "Processed: {}, failed: {}, retried: {}",
        report.processed, report.failed, report.retried
    )
}
