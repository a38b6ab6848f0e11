//! Student boundary resolution (spec §4.2, §9 open question 2).

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StudentBoundary {
    pub student_key: String,
    pub pages: Vec<usize>,
    pub start_page: usize,
    pub end_page: usize,
    #[serde(default)]
    pub student_id: Option<String>,
    #[serde(default)]
    pub student_name: Option<String>,
    #[serde(default)]
    pub needs_confirmation: bool,
}

/// One entry of a caller-supplied `student_mapping`: either an explicit page
/// list or a start/end range (spec §4.2 rule 1).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StudentMappingEntry {
    Explicit {
        student_key: String,
        pages: Vec<i64>,
        #[serde(default)]
        student_id: Option<String>,
        #[serde(default)]
        student_name: Option<String>,
    },
    Range {
        student_key: String,
        start: i64,
        end: i64,
        #[serde(default)]
        student_id: Option<String>,
        #[serde(default)]
        student_name: Option<String>,
    },
}

/// Clips, deduplicates and sorts raw page indices into `[0, total_pages)`.
pub fn sanitize_pages(raw: &[i64], total_pages: usize) -> Vec<usize> {
    let mut set: BTreeSet<usize> = BTreeSet::new();
    for &p in raw {
        if p < 0 {
            continue;
        }
        let p = p as usize;
        if p < total_pages {
            set.insert(p);
        }
    }
    set.into_iter().collect()
}

/// Resolves student boundaries, in spec §4.2 priority order. Overlaps in
/// `student_mapping` are sanitized but never rejected (decided in DESIGN.md,
/// open question 2); a `warn!` is logged when detected.
pub fn resolve_boundaries(
    student_mapping: Option<&[StudentMappingEntry]>,
    manual_boundaries: Option<&[i64]>,
    total_pages: usize,
) -> Vec<StudentBoundary> {
    if let Some(mapping) = student_mapping {
        if !mapping.is_empty() {
            return resolve_from_mapping(mapping, total_pages);
        }
    }

    if let Some(starts) = manual_boundaries {
        if !starts.is_empty() {
            return resolve_from_manual_starts(starts, total_pages);
        }
    }

    single_student_boundary(total_pages)
}

fn resolve_from_mapping(mapping: &[StudentMappingEntry], total_pages: usize) -> Vec<StudentBoundary> {
    let mut seen_pages: BTreeSet<usize> = BTreeSet::new();
    let mut overlap_detected = false;
    let mut boundaries = Vec::new();

    for entry in mapping {
        let (student_key, raw_pages, student_id, student_name) = match entry {
            StudentMappingEntry::Explicit {
                student_key,
                pages,
                student_id,
                student_name,
            } => (student_key.clone(), pages.clone(), student_id.clone(), student_name.clone()),
            StudentMappingEntry::Range {
                student_key,
                start,
                end,
                student_id,
                student_name,
            } => (
                student_key.clone(),
                (*start..=*end).collect::<Vec<i64>>(),
                student_id.clone(),
                student_name.clone(),
            ),
        };

        let pages = sanitize_pages(&raw_pages, total_pages);
        if pages.is_empty() {
            continue;
        }
        for &p in &pages {
            if !seen_pages.insert(p) {
                overlap_detected = true;
            }
        }

        boundaries.push(StudentBoundary {
            student_key,
            start_page: pages[0],
            end_page: *pages.last().unwrap(),
            pages,
            student_id,
            student_name,
            needs_confirmation: false,
        });
    }

    if overlap_detected {
        tracing::warn!("student_mapping has overlapping pages; sanitized, not rejected");
    }

    if boundaries.is_empty() {
        return single_student_boundary(total_pages);
    }
    boundaries
}

fn resolve_from_manual_starts(starts: &[i64], total_pages: usize) -> Vec<StudentBoundary> {
    let mut sanitized = sanitize_pages(starts, total_pages);
    sanitized.retain(|&s| s < total_pages);
    if sanitized.is_empty() {
        return single_student_boundary(total_pages);
    }

    let mut boundaries = Vec::new();
    for (i, &start) in sanitized.iter().enumerate() {
        let end = if i + 1 < sanitized.len() {
            sanitized[i + 1] - 1
        } else {
            total_pages.saturating_sub(1)
        };
        let pages: Vec<usize> = (start..=end).collect();
        if pages.is_empty() {
            continue;
        }
        boundaries.push(StudentBoundary {
            student_key: format!("Student {}", i + 1),
            start_page: start,
            end_page: end,
            pages,
            student_id: None,
            student_name: None,
            needs_confirmation: false,
        });
    }

    if boundaries.is_empty() {
        return single_student_boundary(total_pages);
    }
    boundaries
}

fn single_student_boundary(total_pages: usize) -> Vec<StudentBoundary> {
    if total_pages == 0 {
        tracing::warn!("no valid student boundary resolved and zero pages; emitting empty default boundary");
        return vec![StudentBoundary {
            student_key: "Student 1".to_string(),
            pages: vec![],
            start_page: 0,
            end_page: 0,
            student_id: None,
            student_name: None,
            needs_confirmation: false,
        }];
    }
    tracing::warn!("no valid student boundary resolved; falling back to single-student mode");
    vec![StudentBoundary {
        student_key: "Student 1".to_string(),
        pages: (0..total_pages).collect(),
        start_page: 0,
        end_page: total_pages - 1,
        student_id: None,
        student_name: None,
        needs_confirmation: false,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_mapping_sanitizes_and_sorts() {
        let mapping = vec![StudentMappingEntry::Explicit {
            student_key: "s1".into(),
            pages: vec![-1, 3, 1, 1, 100],
            student_id: None,
            student_name: None,
        }];
        let boundaries = resolve_boundaries(Some(&mapping), None, 5);
        assert_eq!(boundaries.len(), 1);
        assert_eq!(boundaries[0].pages, vec![1, 3]);
    }

    #[test]
    fn manual_starts_fill_gaps() {
        let starts = vec![0, 3, 5];
        let boundaries = resolve_from_manual_starts(&starts, 6);
        assert_eq!(boundaries.len(), 3);
        assert_eq!(boundaries[0].pages, vec![0, 1, 2]);
        assert_eq!(boundaries[1].pages, vec![3, 4]);
        assert_eq!(boundaries[2].pages, vec![5]);
    }

    #[test]
    fn no_boundaries_falls_back_to_single_student() {
        let boundaries = resolve_boundaries(None, None, 4);
        assert_eq!(boundaries.len(), 1);
        assert_eq!(boundaries[0].student_key, "Student 1");
        assert_eq!(boundaries[0].pages, vec![0, 1, 2, 3]);
    }

    #[test]
    fn overlapping_mapping_is_sanitized_not_rejected() {
        let mapping = vec![
            StudentMappingEntry::Range {
                student_key: "s1".into(),
                start: 0,
                end: 2,
                student_id: None,
                student_name: None,
            },
            StudentMappingEntry::Range {
                student_key: "s2".into(),
                start: 1,
                end: 3,
                student_id: None,
                student_name: None,
            },
        ];
        let boundaries = resolve_boundaries(Some(&mapping), None, 4);
        assert_eq!(boundaries.len(), 2);
    }
}
