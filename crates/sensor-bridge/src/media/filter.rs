// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Case-insensitive filename glob (`*`, `?`, `[abc]`, `[!a-z]`).

/// Filename filter for one view.
#[derive(Debug, Clone)]
pub struct FilenameFilter {
    pattern: Vec<char>,
}

impl FilenameFilter {
    pub fn new(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_lowercase().chars().collect(),
        }
    }

    /// Check a file name (not a full path) against the pattern.
    pub fn matches(&self, filename: &str) -> bool {
        let text: Vec<char> = filename.to_lowercase().chars().collect();
        glob_match(&self.pattern, &text, 0, 0)
    }
}

fn glob_match(pattern: &[char], text: &[char], pi: usize, ti: usize) -> bool {
    if pi == pattern.len() {
        return ti == text.len();
    }

    match pattern[pi] {
        '*' => {
            // Collapse runs of '*'
            let mut next = pi;
            while next < pattern.len() && pattern[next] == '*' {
                next += 1;
            }
            (ti..=text.len()).any(|i| glob_match(pattern, text, next, i))
        }
        '?' => ti < text.len() && glob_match(pattern, text, pi + 1, ti + 1),
        '[' => match class_match(pattern, pi, text.get(ti).copied()) {
            ClassMatch::Matched(end) => glob_match(pattern, text, end, ti + 1),
            ClassMatch::NotMatched => false,
            // Unterminated class: '[' is a literal
            ClassMatch::Literal => {
                ti < text.len() && text[ti] == '[' && glob_match(pattern, text, pi + 1, ti + 1)
            }
        },
        c => ti < text.len() && text[ti] == c && glob_match(pattern, text, pi + 1, ti + 1),
    }
}

enum ClassMatch {
    /// Matched; pattern resumes at the given index.
    Matched(usize),
    NotMatched,
    Literal,
}

fn class_match(pattern: &[char], start: usize, ch: Option<char>) -> ClassMatch {
    let mut i = start + 1;
    let negated = pattern.get(i) == Some(&'!');
    if negated {
        i += 1;
    }
    // A ']' right after the opening bracket is a member
    let body_start = i;
    let mut end = None;
    let mut j = i;
    while j < pattern.len() {
        if pattern[j] == ']' && j > body_start {
            end = Some(j);
            break;
        }
        j += 1;
    }
    let Some(end) = end else {
        return ClassMatch::Literal;
    };
    let Some(ch) = ch else {
        return ClassMatch::NotMatched;
    };

    let mut found = false;
    while i < end {
        if i + 2 < end && pattern[i + 1] == '-' {
            if pattern[i] <= ch && ch <= pattern[i + 2] {
                found = true;
            }
            i += 3;
        } else {
            if pattern[i] == ch {
                found = true;
            }
            i += 1;
        }
    }

    if found != negated {
        ClassMatch::Matched(end + 1)
    } else {
        ClassMatch::NotMatched
    }
}
