//! Paragraph merging
//!
//! Groups neighbouring text lines into blocks. A line joins a block when
//! its extent falls within the block's bounds widened by a multiple of the
//! block's mean line height. Merged blocks carry no confidence.

use super::{Detection, TextLine};

/// Horizontal slack, in mean line heights
const X_SLACK: f32 = 1.0;
/// Vertical slack, in mean line heights
const Y_SLACK: f32 = 0.5;
/// Lines whose centers are within this many mean heights share a row
const ROW_TOLERANCE: f32 = 0.4;

struct Member {
    min_x: f32,
    max_x: f32,
    min_y: f32,
    max_y: f32,
    center_y: f32,
    text: String,
    group: usize,
}

impl Member {
    fn height(&self) -> f32 {
        self.max_y - self.min_y
    }
}

#[derive(Clone, Copy)]
struct Bounds {
    min_x: f32,
    max_x: f32,
    min_y: f32,
    max_y: f32,
    mean_height: f32,
}

fn bounds<'a>(members: impl Iterator<Item = &'a Member>) -> Option<Bounds> {
    let mut count = 0usize;
    let mut b = Bounds {
        min_x: f32::INFINITY,
        max_x: f32::NEG_INFINITY,
        min_y: f32::INFINITY,
        max_y: f32::NEG_INFINITY,
        mean_height: 0.0,
    };
    for m in members {
        b.min_x = b.min_x.min(m.min_x);
        b.max_x = b.max_x.max(m.max_x);
        b.min_y = b.min_y.min(m.min_y);
        b.max_y = b.max_y.max(m.max_y);
        b.mean_height += m.height();
        count += 1;
    }
    if count == 0 {
        return None;
    }
    b.mean_height /= count as f32;
    Some(b)
}

/// Merge lines into paragraphs. Paragraphs come out in group order: each
/// group is seeded by the first line not yet placed, so the input order
/// decides the output order.
pub fn merge_paragraphs(lines: Vec<TextLine>) -> Vec<Detection> {
    let mut members: Vec<Member> = lines
        .into_iter()
        .map(|line| {
            let xs = line.quad.iter().map(|p| p.0);
            let ys = line.quad.iter().map(|p| p.1);
            let min_y = ys.clone().fold(f32::INFINITY, f32::min);
            let max_y = ys.fold(f32::NEG_INFINITY, f32::max);
            Member {
                min_x: xs.clone().fold(f32::INFINITY, f32::min),
                max_x: xs.fold(f32::NEG_INFINITY, f32::max),
                min_y,
                max_y,
                center_y: 0.5 * (min_y + max_y),
                text: line.text,
                group: 0,
            }
        })
        .collect();

    let group_count = assign_groups(&mut members);

    (1..=group_count)
        .filter_map(|group| build_paragraph(&members, group))
        .collect()
}

/// Label every member with a group id starting at 1. Returns the last id used.
fn assign_groups(members: &mut [Member]) -> usize {
    let mut current = 1;

    while members.iter().any(|m| m.group == 0) {
        let Some(b) = bounds(members.iter().filter(|m| m.group == current)) else {
            if let Some(first) = members.iter_mut().find(|m| m.group == 0) {
                first.group = current;
            }
            continue;
        };

        let min_gx = b.min_x - X_SLACK * b.mean_height;
        let max_gx = b.max_x + X_SLACK * b.mean_height;
        let min_gy = b.min_y - Y_SLACK * b.mean_height;
        let max_gy = b.max_y + Y_SLACK * b.mean_height;
        let in_x = |v: f32| min_gx <= v && v <= max_gx;
        let in_y = |v: f32| min_gy <= v && v <= max_gy;

        match members
            .iter_mut()
            .find(|m| m.group == 0 && (in_x(m.min_x) || in_x(m.max_x)) && (in_y(m.min_y) || in_y(m.max_y)))
        {
            Some(m) => m.group = current,
            None => current += 1,
        }
    }

    if members.is_empty() {
        0
    } else {
        current
    }
}

/// Join a group's lines row by row, left to right
fn build_paragraph(members: &[Member], group: usize) -> Option<Detection> {
    let mut remaining: Vec<&Member> = members.iter().filter(|m| m.group == group).collect();
    let b = bounds(remaining.iter().copied())?;

    let mut words = Vec::with_capacity(remaining.len());
    while !remaining.is_empty() {
        let highest = remaining
            .iter()
            .map(|m| m.center_y)
            .fold(f32::INFINITY, f32::min);
        let row_limit = highest + ROW_TOLERANCE * b.mean_height;
        let most_left = remaining
            .iter()
            .filter(|m| m.center_y < row_limit)
            .map(|m| m.min_x)
            .fold(f32::INFINITY, f32::min);

        // Ties go to the later line
        let Some(index) = remaining
            .iter()
            .rposition(|m| m.center_y < row_limit && m.min_x == most_left)
        else {
            break;
        };
        words.push(remaining.remove(index).text.as_str());
    }

    let polygon = vec![
        (b.min_x, b.min_y),
        (b.max_x, b.min_y),
        (b.max_x, b.max_y),
        (b.min_x, b.max_y),
    ];

    Some(Detection {
        polygon,
        text: words.join(" "),
        confidence: None,
    })
}
