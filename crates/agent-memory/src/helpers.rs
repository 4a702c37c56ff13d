// Memory Helpers
// Formatting, scoring and summaries over retrieved memories

use crate::types::{MemoryRecord, MetadataFilter};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Earliest and latest creation time among a set of memories.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySummary {
    pub total_count: usize,
    pub avg_relevance: f64,
    pub date_range: DateRange,
}

/// Human-readable rendering of a memory, one field per line.
pub fn format_memory(memory: &MemoryRecord) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "Memory ID: {}", memory.id);
    let _ = writeln!(output, "Content: {}", memory.content);
    output.push_str("Metadata:\n");
    for (key, value) in &memory.metadata {
        let _ = writeln!(output, "  {}: {}", key, value);
    }
    if let Some(relevance) = memory.relevance {
        let _ = writeln!(output, "Relevance: {:.2}", relevance);
    }
    output
}

/// `1 - distance`, clamped to [0, 1].
pub fn calculate_relevance(distance: f64) -> f64 {
    (1.0 - distance).clamp(0.0, 1.0)
}

/// Memories created within `[start, end]`.
///
/// Records without a parseable `timestamp` are dropped.
pub fn filter_by_date_range(
    memories: &[MemoryRecord],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<MemoryRecord> {
    memories
        .iter()
        .filter(|memory| {
            memory
                .metadata
                .timestamp()
                .is_some_and(|ts| start <= ts && ts <= end)
        })
        .cloned()
        .collect()
}

/// Memories whose metadata satisfies `filter`, in input order.
pub fn filter_by_metadata(memories: &[MemoryRecord], filter: &MetadataFilter) -> Vec<MemoryRecord> {
    memories
        .iter()
        .filter(|memory| filter.matches(&memory.metadata))
        .cloned()
        .collect()
}

/// Count, mean relevance and creation-time span.
///
/// Unscored memories count as relevance 0.
pub fn summarize_memories(memories: &[MemoryRecord]) -> MemorySummary {
    let avg_relevance = if memories.is_empty() {
        0.0
    } else {
        memories
            .iter()
            .map(|m| m.relevance.unwrap_or(0.0))
            .sum::<f64>()
            / memories.len() as f64
    };

    let timestamps = memories.iter().filter_map(|m| m.metadata.timestamp());
    let date_range = timestamps.fold(DateRange::default(), |range, ts| DateRange {
        earliest: Some(range.earliest.map_or(ts, |e| e.min(ts))),
        latest: Some(range.latest.map_or(ts, |l| l.max(ts))),
    });

    MemorySummary {
        total_count: memories.len(),
        avg_relevance,
        date_range,
    }
}
