//! A tiny in-memory chart catalogue standing in for a real score backend.

use std::fmt;

#[derive(Debug, Clone, Copy)]
pub struct Chart {
    pub id: u32,
    pub title: &'static str,
    pub genre: &'static str,
    pub level: f32,
}

impl fmt::Display for Chart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} [{}] Lv.{:.1}",
            self.id, self.title, self.genre, self.level
        )
    }
}

pub const CHARTS: &[Chart] = &[
    Chart { id: 101, title: "Glacier Drive", genre: "Original", level: 10.2 },
    Chart { id: 102, title: "Glacier Drive (Remix)", genre: "Original", level: 12.8 },
    Chart { id: 205, title: "Neon Parade", genre: "Pop", level: 9.5 },
    Chart { id: 206, title: "Paper Moon Waltz", genre: "Pop", level: 11.3 },
    Chart { id: 310, title: "Overclocked Heart", genre: "Variety", level: 13.6 },
    Chart { id: 311, title: "Tidal Lock", genre: "Variety", level: 10.9 },
    Chart { id: 412, title: "Old Town Arcade", genre: "Game", level: 8.7 },
    Chart { id: 413, title: "Last Boss Theme", genre: "Game", level: 14.1 },
];

pub fn by_id(id: u32) -> Option<&'static Chart> {
    CHARTS.iter().find(|c| c.id == id)
}

/// Charts whose level lies in `min..=max`.
pub fn by_level(min: f32, max: f32) -> Vec<&'static Chart> {
    CHARTS
        .iter()
        .filter(|c| c.level >= min && c.level <= max)
        .collect()
}

pub fn by_genre(genre: &str) -> Vec<&'static Chart> {
    CHARTS
        .iter()
        .filter(|c| c.genre.eq_ignore_ascii_case(genre))
        .collect()
}

/// Charts whose title contains `query`, ignoring case.
pub fn search(query: &str) -> Vec<&'static Chart> {
    let query = query.to_lowercase();
    CHARTS
        .iter()
        .filter(|c| c.title.to_lowercase().contains(&query))
        .collect()
}

/// Parses `"10"`, `"10.5"` or `"10-11"` into an inclusive level range.
///
/// A bare integer covers the whole level, so `"10"` means `10.0..=10.9`.
pub fn parse_level_range(text: &str) -> Option<(f32, f32)> {
    let text = text.trim();
    if let Some((lo, hi)) = text.split_once('-') {
        let lo: f32 = lo.trim().parse().ok()?;
        let hi: f32 = hi.trim().parse().ok()?;
        return (lo <= hi).then_some((lo, hi + 0.9));
    }
    let level: f32 = text.parse().ok()?;
    if text.contains('.') {
        Some((level, level))
    } else {
        Some((level, level + 0.9))
    }
}
