use time::{Date, Duration};

use crate::content_id::MediaType;
use crate::metadata::tmdb::MovieReleaseDates;

/// Everything the gate needs to know about the request's release windows.
#[derive(Debug, Clone, Default)]
pub struct ReleaseFacts {
    /// Movie release date / series first-air date.
    pub release: Option<Date>,
    /// Requested episode's air date, for series.
    pub episode_air: Option<Date>,
    pub theatrical: Option<Date>,
    pub home_releases: Option<MovieReleaseDates>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateDecision {
    pub allow: bool,
    pub reason: &'static str,
}

fn allow(reason: &'static str) -> GateDecision {
    GateDecision { allow: true, reason }
}

fn block(reason: &'static str) -> GateDecision {
    GateDecision { allow: false, reason }
}

/// Fixed rule table, evaluated top to bottom; the first matching rule
/// decides.
pub fn evaluate(
    media: MediaType,
    today: Date,
    tolerance_days: i64,
    facts: &ReleaseFacts,
) -> GateDecision {
    let tolerance = Duration::days(tolerance_days);
    let is_series = matches!(media, MediaType::Series | MediaType::Anime);

    // (a) release within tolerance of today
    if let Some(release) = facts.release {
        let age = today - release;
        if age.abs() <= tolerance {
            return allow("release within tolerance");
        }
        // (b) release in the future
        if release > today {
            return block("release in the future");
        }
    }

    if is_series {
        // (c) no episode air date known
        let Some(air) = facts.episode_air else {
            return allow("episode air date unknown");
        };
        // (d) episode within tolerance
        if (today - air).abs() <= tolerance {
            return allow("episode within tolerance");
        }
        // (e) episode in the future
        if air > today {
            return block("episode in the future");
        }
    }

    if media == MediaType::Movie {
        // (f) over a year since theatrical release
        if let Some(theatrical) = facts.theatrical {
            if today - theatrical > Duration::days(365) {
                return allow("over a year since theatrical");
            }
        }
    }

    // (g) no home release dates at all
    let Some(dates) = facts.home_releases.as_ref().filter(|d| d.earliest_home_release().is_some())
    else {
        return allow("no home release dates");
    };

    // (h) any digital/physical/TV release already past
    if dates
        .digital
        .iter()
        .chain(&dates.physical)
        .chain(&dates.tv)
        .any(|d| *d <= today)
    {
        return allow("home release already out");
    }

    // (i)/(j) closest future digital release vs tolerance
    if let Some(closest) = dates.earliest_home_release() {
        if closest - today <= tolerance {
            return allow("home release imminent");
        }
        return block("home release too far out");
    }

    // (k)
    block("no applicable release window")
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    const TODAY: Date = date!(2024 - 06 - 15);

    #[test]
    fn fresh_release_within_tolerance() {
        let facts = ReleaseFacts {
            release: Some(date!(2024 - 06 - 14)),
            ..Default::default()
        };
        let decision = evaluate(MediaType::Movie, TODAY, 3, &facts);
        assert!(decision.allow);
    }

    #[test]
    fn future_release_blocked() {
        let facts = ReleaseFacts {
            release: Some(date!(2024 - 08 - 01)),
            ..Default::default()
        };
        assert!(!evaluate(MediaType::Movie, TODAY, 0, &facts).allow);
    }

    #[test]
    fn series_without_air_date_allowed() {
        let facts = ReleaseFacts {
            release: Some(date!(2020 - 01 - 01)),
            episode_air: None,
            ..Default::default()
        };
        assert!(evaluate(MediaType::Series, TODAY, 0, &facts).allow);
    }

    #[test]
    fn future_episode_blocked() {
        let facts = ReleaseFacts {
            release: Some(date!(2020 - 01 - 01)),
            episode_air: Some(date!(2024 - 07 - 20)),
            ..Default::default()
        };
        let decision = evaluate(MediaType::Series, TODAY, 1, &facts);
        assert!(!decision.allow);
        assert_eq!(decision.reason, "episode in the future");
    }

    #[test]
    fn movie_without_home_dates_allowed() {
        // theatrical six months ago, no digital/physical dates, tolerance 0
        let facts = ReleaseFacts {
            release: Some(date!(2023 - 12 - 15)),
            theatrical: Some(date!(2023 - 12 - 15)),
            home_releases: Some(MovieReleaseDates {
                theatrical: Some(date!(2023 - 12 - 15)),
                ..Default::default()
            }),
            ..Default::default()
        };
        let decision = evaluate(MediaType::Movie, TODAY, 0, &facts);
        assert!(decision.allow);
        assert_eq!(decision.reason, "no home release dates");
    }

    #[test]
    fn past_digital_release_allowed() {
        let facts = ReleaseFacts {
            release: Some(date!(2024 - 01 - 01)),
            theatrical: Some(date!(2024 - 01 - 01)),
            home_releases: Some(MovieReleaseDates {
                digital: vec![date!(2024 - 05 - 01)],
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(evaluate(MediaType::Movie, TODAY, 0, &facts).allow);
    }

    #[test]
    fn far_future_digital_release_blocked() {
        let facts = ReleaseFacts {
            release: Some(date!(2024 - 03 - 01)),
            theatrical: Some(date!(2024 - 03 - 01)),
            home_releases: Some(MovieReleaseDates {
                digital: vec![date!(2024 - 09 - 01)],
                ..Default::default()
            }),
            ..Default::default()
        };
        let decision = evaluate(MediaType::Movie, TODAY, 7, &facts);
        assert!(!decision.allow);
        assert_eq!(decision.reason, "home release too far out");
    }

    #[test]
    fn imminent_digital_release_allowed() {
        let facts = ReleaseFacts {
            release: Some(date!(2024 - 03 - 01)),
            theatrical: Some(date!(2024 - 03 - 01)),
            home_releases: Some(MovieReleaseDates {
                digital: vec![date!(2024 - 06 - 18)],
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(evaluate(MediaType::Movie, TODAY, 7, &facts).allow);
    }
}
