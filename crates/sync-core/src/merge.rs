//! The consumed `Merge` interface (spec §6): three-way text merge, binary
//! sniffing, and mergeable-extension detection, treated by the core as a
//! pure-function external collaborator.

/// Tokeniser granularity passed to `merge3`. The core defaults to `Word`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tokenizer {
    Character,
    Word,
    Line,
}

pub trait Merge: Send + Sync {
    /// Three-way merge of `left` and `right`, both derived from `original`.
    fn merge3(&self, original: &str, left: &str, right: &str, tokenizer: Tokenizer) -> String;
    fn is_binary(&self, bytes: &[u8]) -> bool;
    fn is_file_type_mergeable(&self, extension: Option<&str>) -> bool;
}

/// Default extensions treated as mergeable text, driven by configuration
/// rather than hardcoded into the core (see `Settings::mergeable_extensions`).
pub const DEFAULT_MERGEABLE_EXTENSIONS: &[&str] =
    &["md", "txt", "json", "yaml", "yml", "toml", "csv"];

/// Diff3-style line/word/character three-way merge. Each side is diffed
/// independently against `original`; edits that touch disjoint regions are
/// applied independently, and only edits whose ancestor ranges genuinely
/// overlap are rendered as a conflict.
pub struct TextMerge {
    mergeable_extensions: Vec<String>,
}

impl Default for TextMerge {
    fn default() -> Self {
        Self {
            mergeable_extensions: DEFAULT_MERGEABLE_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl TextMerge {
    pub fn new(mergeable_extensions: Vec<String>) -> Self {
        Self {
            mergeable_extensions,
        }
    }
}

impl Merge for TextMerge {
    fn merge3(&self, original: &str, left: &str, right: &str, tokenizer: Tokenizer) -> String {
        let split: fn(&str) -> Vec<&str> = match tokenizer {
            Tokenizer::Line => |s| s.split_inclusive('\n').collect(),
            Tokenizer::Word => |s| s.split_inclusive(' ').collect(),
            Tokenizer::Character => |s| s.split("").skip(1).collect(),
        };
        three_way_merge(&split(original), &split(left), &split(right)).concat()
    }

    fn is_binary(&self, bytes: &[u8]) -> bool {
        bytes.iter().take(8000).any(|&b| b == 0)
    }

    fn is_file_type_mergeable(&self, extension: Option<&str>) -> bool {
        match extension {
            Some(ext) => self
                .mergeable_extensions
                .iter()
                .any(|e| e.eq_ignore_ascii_case(ext)),
            None => false,
        }
    }
}

/// A single change against a range of the original token sequence: replace
/// `original[o_start..o_end]` with `text` (an empty range is a pure insertion,
/// empty `text` is a pure deletion).
struct Edit<'a> {
    o_start: usize,
    o_end: usize,
    text: Vec<&'a str>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

/// Standard LCS alignment via DP, returned as matched index pairs
/// `(i, j)` with `a[i] == b[j]`, strictly increasing in both coordinates.
fn lcs_indices(a: &[&str], b: &[&str]) -> Vec<(usize, usize)> {
    let n = a.len();
    let m = b.len();
    let mut dp = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            dp[i][j] = if a[i] == b[j] {
                dp[i + 1][j + 1] + 1
            } else {
                dp[i + 1][j].max(dp[i][j + 1])
            };
        }
    }
    let mut result = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            result.push((i, j));
            i += 1;
            j += 1;
        } else if dp[i + 1][j] >= dp[i][j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    result
}

/// Edit script transforming `original` into `side`, expressed purely in
/// terms of `original` ranges (so two scripts against the same original can
/// be compared for overlap without reference to either side's own indices).
fn diff_edits<'a>(original: &[&'a str], side: &[&'a str]) -> Vec<Edit<'a>> {
    let matches = lcs_indices(original, side);
    let mut edits = Vec::new();
    let (mut prev_o, mut prev_x) = (0, 0);
    for (oi, xi) in matches.into_iter().chain(std::iter::once((original.len(), side.len()))) {
        if oi > prev_o || xi > prev_x {
            edits.push(Edit {
                o_start: prev_o,
                o_end: oi,
                text: side[prev_x..xi].to_vec(),
            });
        }
        prev_o = oi + 1;
        prev_x = xi + 1;
    }
    edits
}

/// Two edit ranges conflict if they genuinely overlap; a pure insertion
/// (zero-length range) only conflicts when its anchor point falls strictly
/// inside the other range, not when it merely touches a boundary.
fn ranges_conflict(a_start: usize, a_end: usize, b_start: usize, b_end: usize) -> bool {
    if a_start == a_end {
        b_start < a_start && a_start < b_end
    } else if b_start == b_end {
        a_start < b_start && b_start < a_end
    } else {
        a_start < b_end && b_start < a_end
    }
}

fn three_way_merge<'a>(
    original: &[&'a str],
    left: &[&'a str],
    right: &[&'a str],
) -> Vec<&'a str> {
    let mut tagged: Vec<(Side, Edit<'a>)> = diff_edits(original, left)
        .into_iter()
        .map(|e| (Side::Left, e))
        .chain(diff_edits(original, right).into_iter().map(|e| (Side::Right, e)))
        .collect();
    tagged.sort_by_key(|(_, e)| (e.o_start, e.o_end));

    let mut clusters: Vec<Vec<(Side, Edit<'a>)>> = Vec::new();
    for edit in tagged {
        let overlaps_last = clusters
            .last()
            .map(|cluster| {
                cluster
                    .iter()
                    .any(|(_, e)| ranges_conflict(e.o_start, e.o_end, edit.1.o_start, edit.1.o_end))
            })
            .unwrap_or(false);
        if overlaps_last {
            clusters.last_mut().unwrap().push(edit);
        } else {
            clusters.push(vec![edit]);
        }
    }

    let mut result: Vec<&'a str> = Vec::new();
    let mut i = 0usize;
    for cluster in clusters {
        let o_start = cluster.iter().map(|(_, e)| e.o_start).min().unwrap();
        let o_end = cluster.iter().map(|(_, e)| e.o_end).max().unwrap();

        while i < o_start {
            result.push(original[i]);
            i += 1;
        }

        let left_text: Vec<&'a str> = cluster
            .iter()
            .filter(|(side, _)| *side == Side::Left)
            .flat_map(|(_, e)| e.text.clone())
            .collect();
        let right_text: Vec<&'a str> = cluster
            .iter()
            .filter(|(side, _)| *side == Side::Right)
            .flat_map(|(_, e)| e.text.clone())
            .collect();
        let has_left = cluster.iter().any(|(side, _)| *side == Side::Left);
        let has_right = cluster.iter().any(|(side, _)| *side == Side::Right);

        if has_left && !has_right {
            result.extend(left_text);
        } else if has_right && !has_left {
            result.extend(right_text);
        } else if left_text == right_text {
            result.extend(left_text);
        } else {
            result.push("<<<<<<< left\n");
            result.extend(left_text);
            result.push("=======\n");
            result.extend(right_text);
            result.push(">>>>>>> right\n");
        }

        i = o_end;
    }
    while i < original.len() {
        result.push(original[i]);
        i += 1;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_non_overlapping_word_edits() {
        let merge = TextMerge::default();
        let merged =
            merge.merge3("Hello world", "Hello beautiful world", "Hi world", Tokenizer::Word);
        assert_eq!(merged, "Hi beautiful world");
    }

    #[test]
    fn identical_edit_on_both_sides_is_not_a_conflict() {
        let merge = TextMerge::default();
        let merged = merge.merge3("a b c", "a x c", "a x c", Tokenizer::Word);
        assert_eq!(merged, "a x c");
    }

    #[test]
    fn overlapping_edits_produce_conflict_markers() {
        let merge = TextMerge::default();
        let merged = merge.merge3("a b c", "a x c", "a y c", Tokenizer::Word);
        assert!(merged.contains("<<<<<<<"));
        assert!(merged.contains(">>>>>>>"));
    }

    #[test]
    fn unchanged_side_yields_the_other_sides_edit() {
        let merge = TextMerge::default();
        let merged = merge.merge3("a b c", "a b c", "a x c", Tokenizer::Word);
        assert_eq!(merged, "a x c");
    }

    #[test]
    fn is_binary_detects_null_byte() {
        let merge = TextMerge::default();
        assert!(merge.is_binary(b"abc\0def"));
        assert!(!merge.is_binary(b"plain text"));
    }

    #[test]
    fn mergeable_extension_is_case_insensitive() {
        let merge = TextMerge::default();
        assert!(merge.is_file_type_mergeable(Some("MD")));
        assert!(!merge.is_file_type_mergeable(Some("png")));
        assert!(!merge.is_file_type_mergeable(None));
    }
}
