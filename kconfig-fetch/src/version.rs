// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! RPM version string comparison.

Implements the rpm version comparison algorithm over `(version, release)`
pairs. Version strings are decomposed into alternating runs of digits and
letters; separators carry no weight of their own.
*/

use {once_cell::sync::Lazy, regex::Regex, std::cmp::Ordering};

static RUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new("[0-9]+|[a-zA-Z]+").expect("static regex is valid"));

/// Compare two RPM version (or release) strings.
///
/// Rules, applied run by run:
///
/// - when one sequence of runs is exhausted, the longer one is newer;
/// - a digit run is always newer than a letter run at the same position;
/// - digit runs compare numerically, letter runs lexicographically;
/// - ties fall through to the next run.
pub fn rpmvercmp(a: &str, b: &str) -> Ordering {
    let mut left = RUN_RE.find_iter(a).map(|m| m.as_str());
    let mut right = RUN_RE.find_iter(b).map(|m| m.as_str());

    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (Some(x), Some(y)) => {
                let ord = compare_run(x, y);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// Compare `(version, release)` pairs; release is the tiebreak.
pub fn compare_evr(a: (&str, &str), b: (&str, &str)) -> Ordering {
    rpmvercmp(a.0, b.0).then_with(|| rpmvercmp(a.1, b.1))
}

fn compare_run(x: &str, y: &str) -> Ordering {
    let x_numeric = x.as_bytes()[0].is_ascii_digit();
    let y_numeric = y.as_bytes()[0].is_ascii_digit();

    match (x_numeric, y_numeric) {
        (true, true) => compare_numeric(x, y),
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => x.cmp(y),
    }
}

/// Numeric comparison of digit runs without parsing into a fixed-width
/// integer, so arbitrarily long version numbers cannot overflow.
fn compare_numeric(x: &str, y: &str) -> Ordering {
    let x = x.trim_start_matches('0');
    let y = y.trim_start_matches('0');

    x.len().cmp(&y.len()).then_with(|| x.cmp(y))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn documented_cases() {
        assert_eq!(rpmvercmp("5.10", "5.9"), Ordering::Greater);
        assert_eq!(rpmvercmp("1.0", "1.0"), Ordering::Equal);
        assert_eq!(rpmvercmp("1.0.1", "1.0"), Ordering::Greater);
        assert_eq!(rpmvercmp("1.10", "1.9"), Ordering::Greater);
    }

    #[test]
    fn numeric_runs_compare_numerically() {
        assert_eq!(rpmvercmp("10", "9"), Ordering::Greater);
        assert_eq!(rpmvercmp("0010", "9"), Ordering::Greater);
        assert_eq!(rpmvercmp("5.0010", "5.10"), Ordering::Equal);
    }

    #[test]
    fn digit_runs_outrank_letter_runs() {
        assert_eq!(rpmvercmp("1.0.1", "1.0.a"), Ordering::Greater);
        assert_eq!(rpmvercmp("2a", "21"), Ordering::Less);
    }

    #[test]
    fn longer_sequence_beats_exhausted_one() {
        assert_eq!(rpmvercmp("1.0a", "1.0"), Ordering::Greater);
        assert_eq!(rpmvercmp("1.0", "1.0.rc1"), Ordering::Less);
    }

    #[test]
    fn separators_carry_no_weight() {
        assert_eq!(rpmvercmp("1.0.1", "1_0_1"), Ordering::Equal);
        assert_eq!(rpmvercmp("2.50", "2.50"), Ordering::Equal);
    }

    #[test]
    fn huge_numeric_runs_do_not_overflow() {
        assert_eq!(
            rpmvercmp("20240101999999999999999999", "20240101999999999999999998"),
            Ordering::Greater
        );
    }

    #[test]
    fn antisymmetry() {
        let cases = [
            ("5.10", "5.9"),
            ("1.0", "1.0"),
            ("1.0.1", "1.0"),
            ("1.0a", "1.0"),
            ("2a", "21"),
            ("4.18.0", "4.18.0"),
            ("el8_9", "el8_10"),
        ];

        for (a, b) in cases {
            assert_eq!(rpmvercmp(a, b), rpmvercmp(b, a).reverse(), "{a} vs {b}");
        }
    }

    #[test]
    fn release_is_the_tiebreak() {
        assert_eq!(
            compare_evr(("4.18.0", "513.24.1"), ("4.18.0", "513.18.1")),
            Ordering::Greater
        );
        assert_eq!(
            compare_evr(("5.15.0", "1"), ("5.14.0", "999")),
            Ordering::Greater
        );
    }
}
