use std::fmt;
use std::ops::{Add, AddAssign};

/// Elapsed time with whole-second resolution.
///
/// Task logs record time spent as "HH:MM:SS". Totals routinely exceed a day,
/// so the text form never wraps hours at 24.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Duration(u64);

impl Duration {
    pub const ZERO: Duration = Duration(0);

    pub fn from_secs(secs: u64) -> Self {
        Duration(secs)
    }

    /// Saturates instead of overflowing.
    pub fn from_hms(hours: u64, minutes: u64, seconds: u64) -> Self {
        Duration(checked_hms(hours, minutes, seconds).unwrap_or(u64::MAX))
    }

    pub fn as_secs(self) -> u64 {
        self.0
    }

    /// Parses "H:M:S". Anything that is not exactly three non-negative integer
    /// fields is treated as zero; dirty logs must not stop a run.
    pub fn parse(text: &str) -> Duration {
        parse_hms(text).unwrap_or(Duration::ZERO)
    }

    /// Like [`Duration::parse`], but also reads the "N days HH:MM:SS" form that
    /// older counter files carry in their total column.
    pub fn parse_stored(text: &str) -> Duration {
        let t = text.trim();
        if let Some((days, rest)) = t.split_once(" days ").or_else(|| t.split_once(" day ")) {
            let total = days
                .trim()
                .parse::<u64>()
                .ok()
                .zip(parse_hms(rest))
                .and_then(|(d, hms)| d.checked_mul(86_400)?.checked_add(hms.0));
            return total.map(Duration).unwrap_or(Duration::ZERO);
        }
        Duration::parse(t)
    }

    pub fn format(self) -> String {
        let hours = self.0 / 3600;
        let minutes = (self.0 % 3600) / 60;
        let seconds = self.0 % 60;
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    }

    /// Integer split across `n` tasks, truncated to whole seconds.
    pub fn div_tasks(self, n: u64) -> Duration {
        if n == 0 {
            return Duration::ZERO;
        }
        Duration(self.0 / n)
    }
}

fn parse_hms(text: &str) -> Option<Duration> {
    let parts: Vec<&str> = text.trim().split(':').collect();
    if parts.len() != 3 {
        return None;
    }
    let h = parts[0].trim().parse::<u64>().ok()?;
    let m = parts[1].trim().parse::<u64>().ok()?;
    let s = parts[2].trim().parse::<u64>().ok()?;
    checked_hms(h, m, s).map(Duration)
}

fn checked_hms(h: u64, m: u64, s: u64) -> Option<u64> {
    h.checked_mul(3600)?
        .checked_add(m.checked_mul(60)?)?
        .checked_add(s)
}

impl Add for Duration {
    type Output = Duration;

    fn add(self, rhs: Duration) -> Duration {
        Duration(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Duration {
    fn add_assign(&mut self, rhs: Duration) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl std::iter::Sum for Duration {
    fn sum<I: Iterator<Item = Duration>>(iter: I) -> Duration {
        iter.fold(Duration::ZERO, |acc, d| acc + d)
    }
}

impl serde::Serialize for Duration {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.format())
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reads_fields_not_widths() {
        assert_eq!(Duration::parse("1:2:3"), Duration::from_hms(1, 2, 3));
        assert_eq!(Duration::parse("00:10:00").as_secs(), 600);
        assert_eq!(Duration::parse(" 0:90:00 "), Duration::from_hms(1, 30, 0));
    }

    #[test]
    fn parse_absorbs_garbage_as_zero() {
        assert_eq!(Duration::parse("garbage"), Duration::ZERO);
        assert_eq!(Duration::parse(""), Duration::ZERO);
        assert_eq!(Duration::parse("10:00"), Duration::ZERO);
        assert_eq!(Duration::parse("1:2:3:4"), Duration::ZERO);
        assert_eq!(Duration::parse("-1:00:00"), Duration::ZERO);
        assert_eq!(Duration::parse("aa:bb:cc"), Duration::ZERO);
    }

    #[test]
    fn oversized_fields_parse_as_zero() {
        assert_eq!(Duration::parse("18446744073709551615:00:00"), Duration::ZERO);
        assert_eq!(Duration::parse("0:18446744073709551615:00"), Duration::ZERO);
        assert_eq!(Duration::parse("99999999999999999999:00:00"), Duration::ZERO);
        assert_eq!(
            Duration::parse_stored("18446744073709551615 days 00:00:01"),
            Duration::ZERO
        );
        assert_eq!(
            Duration::from_secs(u64::MAX) + Duration::from_secs(1),
            Duration::from_secs(u64::MAX)
        );
    }

    #[test]
    fn format_keeps_hours_past_a_day() {
        assert_eq!(Duration::from_hms(26, 5, 9).format(), "26:05:09");
        assert_eq!(Duration::from_hms(123, 0, 1).format(), "123:00:01");
        assert_eq!(Duration::ZERO.to_string(), "00:00:00");
    }

    #[test]
    fn padded_text_survives_parse_and_format() {
        for s in ["00:00:00", "00:10:00", "01:02:03", "23:59:59", "99:59:59", "42:00:07"] {
            assert_eq!(Duration::parse(s).format(), s);
        }
    }

    #[test]
    fn stored_totals_accept_day_prefix() {
        assert_eq!(
            Duration::parse_stored("0 days 00:10:00"),
            Duration::from_hms(0, 10, 0)
        );
        assert_eq!(
            Duration::parse_stored("1 days 02:00:00"),
            Duration::from_hms(26, 0, 0)
        );
        assert_eq!(Duration::parse_stored("30:00:00"), Duration::from_hms(30, 0, 0));
        assert_eq!(Duration::parse_stored("x days 00:10:00"), Duration::ZERO);
    }

    #[test]
    fn division_truncates() {
        assert_eq!(Duration::from_secs(10).div_tasks(3), Duration::from_secs(3));
        assert_eq!(Duration::from_secs(10).div_tasks(0), Duration::ZERO);
        let total: Duration = [Duration::from_secs(5), Duration::from_secs(7)]
            .into_iter()
            .sum();
        assert_eq!(total.as_secs(), 12);
    }
}
