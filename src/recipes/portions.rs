//! Household portion scaling.
//!
//! Children count for 0.7 of an adult serving. Nutrition values and the
//! leading quantity of free-text ingredient lines scale linearly with the
//! household factor; anything that cannot be parsed is left untouched.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const CHILD_PORTION: f64 = 0.7;

/// Effective servings for a household, rounded to two decimals.
pub fn household_portion_factor(adults: u32, children: u32) -> f64 {
    round2(adults as f64 + children as f64 * CHILD_PORTION)
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Integers from 10 upward, at most two trimmed decimals below.
pub fn format_quantity(x: f64) -> String {
    if !x.is_finite() {
        return "0".into();
    }
    if x >= 10.0 {
        return format!("{}", x.round() as i64);
    }
    let s = format!("{:.2}", round2(x));
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() || s == "-0" {
        "0".into()
    } else {
        s.to_string()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Nutrition {
    pub calories_kcal: f64,
    pub protein_g: f64,
    pub carbs_g: f64,
    pub fat_g: f64,
}

impl Nutrition {
    pub fn scale(&self, ratio: f64) -> Self {
        Self {
            calories_kcal: round2(self.calories_kcal * ratio),
            protein_g: round2(self.protein_g * ratio),
            carbs_g: round2(self.carbs_g * ratio),
            fat_g: round2(self.fat_g * ratio),
        }
    }
}

lazy_static! {
    // "200 g", "1,5 kg", "0.5 l", "1/2 tsp"
    static ref LEADING_QTY: Regex =
        Regex::new(r"^\s*(\d+(?:[.,]\d+)?)(?:\s*/\s*(\d+))?(.*)$").unwrap();
}

/// Leading quantity of an ingredient line and the remaining text.
pub fn parse_leading_quantity(line: &str) -> Option<(f64, &str)> {
    let caps = LEADING_QTY.captures(line)?;
    let whole: f64 = caps.get(1)?.as_str().replace(',', ".").parse().ok()?;
    let qty = match caps.get(2) {
        Some(den) => {
            let den: f64 = den.as_str().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            whole / den
        }
        None => whole,
    };
    Some((qty, caps.get(3).map_or("", |m| m.as_str())))
}

/// Scale the leading quantity of `line` by `ratio`; unparseable lines are returned as is.
pub fn scale_ingredient_line(line: &str, ratio: f64) -> String {
    match parse_leading_quantity(line) {
        Some((qty, rest)) => format!("{}{}", format_quantity(qty * ratio), rest),
        None => line.to_string(),
    }
}
