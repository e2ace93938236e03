//! Arbitration between reporters competing to be "now playing".
//!
//! The hub holds at most one [`MediaSnapshot`].  Every incoming report is
//! run through [`RULES`] top-down; the first rule that has an opinion
//! decides, and anything no rule claims is rejected.  Accepted reports
//! either replace the held record (new title) or merge into it (same title,
//! keeping the held artwork when the refresh has none).

use crate::protocol::{MediaReport, MediaSnapshot, SourceId};

/// A validated incoming report.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// The source has nothing playing (blank title or malformed report).
    NoMedia { source_id: SourceId },
    Media(MediaSnapshot),
}

impl Submission {
    pub fn from_report(source_id: SourceId, report: MediaReport) -> Self {
        match report.into_snapshot(source_id) {
            Some(snapshot) => Submission::Media(snapshot),
            None => Submission::NoMedia { source_id },
        }
    }

    pub fn source_id(&self) -> SourceId {
        match self {
            Submission::NoMedia { source_id } => *source_id,
            Submission::Media(snapshot) => snapshot.source_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Drop the held record.
    Clear,
    /// Leave everything as it is.
    Ignore,
    /// Take the report.
    Accept,
}

/// One entry of the precedence table.
pub struct Rule {
    pub name: &'static str,
    pub check: fn(Option<&MediaSnapshot>, &Submission) -> Option<Verdict>,
}

/// Evaluated in order; the first `Some` wins.
pub const RULES: &[Rule] = &[
    Rule {
        name: "clear-own",
        check: clear_own,
    },
    Rule {
        name: "empty-state",
        check: empty_state,
    },
    Rule {
        name: "playing-beats-paused",
        check: playing_beats_paused,
    },
    Rule {
        name: "newer-same-play-state",
        check: newer_same_play_state,
    },
    Rule {
        name: "tracked-source",
        check: tracked_source,
    },
];

/// A source with no media may only clear its own record.
fn clear_own(held: Option<&MediaSnapshot>, sub: &Submission) -> Option<Verdict> {
    let Submission::NoMedia { source_id } = sub else {
        return None;
    };
    match held {
        Some(h) if h.source_id == *source_id => Some(Verdict::Clear),
        _ => Some(Verdict::Ignore),
    }
}

fn empty_state(held: Option<&MediaSnapshot>, sub: &Submission) -> Option<Verdict> {
    match (held, sub) {
        (None, Submission::Media(_)) => Some(Verdict::Accept),
        _ => None,
    }
}

fn playing_beats_paused(held: Option<&MediaSnapshot>, sub: &Submission) -> Option<Verdict> {
    match (held, sub) {
        (Some(h), Submission::Media(r)) if r.is_playing && !h.is_playing => Some(Verdict::Accept),
        _ => None,
    }
}

fn newer_same_play_state(held: Option<&MediaSnapshot>, sub: &Submission) -> Option<Verdict> {
    match (held, sub) {
        (Some(h), Submission::Media(r))
            if r.is_playing == h.is_playing && r.timestamp >= h.timestamp =>
        {
            Some(Verdict::Accept)
        }
        _ => None,
    }
}

/// The tracked source's own reports always apply, even when they look older
/// or weaker than the record they replace.
fn tracked_source(held: Option<&MediaSnapshot>, sub: &Submission) -> Option<Verdict> {
    match (held, sub) {
        (Some(h), Submission::Media(r)) if r.source_id == h.source_id => Some(Verdict::Accept),
        _ => None,
    }
}

/// What a single `submit` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Cleared { rule: &'static str },
    Ignored { rule: &'static str },
    /// New track: held record replaced wholesale.
    Replaced { rule: &'static str },
    /// Same track refreshed.
    Merged { rule: &'static str },
    Rejected,
}

impl Outcome {
    /// Whether the held record may have changed.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Outcome::Cleared { .. } | Outcome::Replaced { .. } | Outcome::Merged { .. }
        )
    }

    pub fn rule(&self) -> Option<&'static str> {
        match self {
            Outcome::Cleared { rule }
            | Outcome::Ignored { rule }
            | Outcome::Replaced { rule }
            | Outcome::Merged { rule } => Some(rule),
            Outcome::Rejected => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct Arbiter {
    held: Option<MediaSnapshot>,
}

impl Arbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The record currently shown, if any.
    pub fn current(&self) -> Option<&MediaSnapshot> {
        self.held.as_ref()
    }

    /// Where routed commands go.
    pub fn command_target(&self) -> Option<SourceId> {
        self.held.as_ref().map(|h| h.source_id)
    }

    pub fn submit_report(&mut self, source_id: SourceId, report: MediaReport) -> Outcome {
        self.submit(Submission::from_report(source_id, report))
    }

    pub fn submit(&mut self, sub: Submission) -> Outcome {
        let decided = RULES
            .iter()
            .find_map(|rule| (rule.check)(self.held.as_ref(), &sub).map(|v| (rule.name, v)));

        let Some((rule, verdict)) = decided else {
            return Outcome::Rejected;
        };

        match (verdict, sub) {
            (Verdict::Clear, _) => {
                self.held = None;
                Outcome::Cleared { rule }
            }
            (Verdict::Ignore, _) => Outcome::Ignored { rule },
            (Verdict::Accept, Submission::Media(report)) => self.accept(rule, report),
            // Only `clear-own` looks at `NoMedia`, and it never accepts.
            (Verdict::Accept, Submission::NoMedia { .. }) => Outcome::Ignored { rule },
        }
    }

    fn accept(&mut self, rule: &'static str, report: MediaSnapshot) -> Outcome {
        match self.held.take() {
            Some(held) if held.title == report.title => {
                self.held = Some(MediaSnapshot {
                    image: report.image.or(held.image),
                    ..report
                });
                Outcome::Merged { rule }
            }
            _ => {
                self.held = Some(report);
                Outcome::Replaced { rule }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: SourceId = SourceId(1);
    const B: SourceId = SourceId(2);

    fn report(title: &str, is_playing: bool, timestamp: u64) -> MediaReport {
        MediaReport::new(title, is_playing, timestamp)
    }

    fn arbiter_with(source: SourceId, rep: MediaReport) -> Arbiter {
        let mut arbiter = Arbiter::new();
        assert!(arbiter.submit_report(source, rep).is_mutation());
        arbiter
    }

    #[test]
    fn test_empty_state_accepts_anything_valid() {
        let mut arbiter = Arbiter::new();
        let outcome = arbiter.submit_report(B, report("X", false, 0));
        assert_eq!(outcome, Outcome::Replaced { rule: "empty-state" });
        assert_eq!(arbiter.command_target(), Some(B));
    }

    #[test]
    fn test_no_media_clears_only_own_record() {
        let mut arbiter = arbiter_with(A, report("X", true, 10));

        let outcome = arbiter.submit_report(B, MediaReport::empty());
        assert_eq!(outcome, Outcome::Ignored { rule: "clear-own" });
        assert_eq!(arbiter.current().unwrap().source_id, A);

        let outcome = arbiter.submit_report(A, report("", true, 11));
        assert_eq!(outcome, Outcome::Cleared { rule: "clear-own" });
        assert!(arbiter.current().is_none());
    }

    #[test]
    fn test_no_media_on_empty_state_is_ignored() {
        let mut arbiter = Arbiter::new();
        let outcome = arbiter.submit_report(A, MediaReport::empty());
        assert_eq!(outcome, Outcome::Ignored { rule: "clear-own" });
        assert!(arbiter.current().is_none());
    }

    #[test]
    fn test_malformed_report_is_treated_as_no_media() {
        let mut arbiter = arbiter_with(A, report("X", true, 10));
        let mut missing_play_state = report("X", true, 11);
        missing_play_state.is_playing = None;

        let outcome = arbiter.submit_report(A, missing_play_state);
        assert_eq!(outcome, Outcome::Cleared { rule: "clear-own" });
    }

    #[test]
    fn test_playing_beats_paused_regardless_of_age() {
        let mut arbiter = arbiter_with(A, report("X", false, 10));
        let outcome = arbiter.submit_report(B, report("Y", true, 5));
        assert_eq!(
            outcome,
            Outcome::Replaced {
                rule: "playing-beats-paused"
            }
        );
        let held = arbiter.current().unwrap();
        assert_eq!(held.source_id, B);
        assert_eq!(held.title, "Y");
    }

    #[test]
    fn test_same_play_state_needs_newer_or_equal_timestamp() {
        let mut arbiter = arbiter_with(A, report("X", true, 10));

        assert_eq!(
            arbiter.submit_report(B, report("Y", true, 9)),
            Outcome::Rejected
        );
        assert_eq!(arbiter.current().unwrap().source_id, A);

        assert_eq!(
            arbiter.submit_report(B, report("Y", true, 11)),
            Outcome::Replaced {
                rule: "newer-same-play-state"
            }
        );
        assert_eq!(arbiter.current().unwrap().source_id, B);
    }

    #[test]
    fn test_equal_timestamp_wins_tie() {
        let mut arbiter = arbiter_with(A, report("X", false, 10));
        let outcome = arbiter.submit_report(B, report("Y", false, 10));
        assert_eq!(
            outcome,
            Outcome::Replaced {
                rule: "newer-same-play-state"
            }
        );
    }

    #[test]
    fn test_paused_other_source_cannot_displace_playing() {
        let mut arbiter = arbiter_with(A, report("X", true, 10));
        assert_eq!(
            arbiter.submit_report(B, report("Y", false, 50)),
            Outcome::Rejected
        );
        assert_eq!(arbiter.current().unwrap().title, "X");
    }

    // Tracked source stays sticky even when its own report looks stale.
    // This can flicker if a tab emits out-of-order timestamps.
    #[test]
    fn test_tracked_source_accepts_older_weaker_report() {
        let mut arbiter = arbiter_with(A, report("X", true, 10));
        let outcome = arbiter.submit_report(A, report("X", false, 3));
        assert_eq!(outcome, Outcome::Merged { rule: "tracked-source" });
        let held = arbiter.current().unwrap();
        assert!(!held.is_playing);
        assert_eq!(held.timestamp, 3);
    }

    #[test]
    fn test_same_title_refresh_keeps_held_image() {
        let mut arbiter = arbiter_with(A, report("X", true, 10).with_image("img1"));
        let outcome = arbiter.submit_report(A, report("X", true, 11));
        assert_eq!(
            outcome,
            Outcome::Merged {
                rule: "newer-same-play-state"
            }
        );
        let held = arbiter.current().unwrap();
        assert_eq!(held.image.as_deref(), Some("img1"));
        assert_eq!(held.timestamp, 11);
    }

    #[test]
    fn test_same_title_refresh_takes_new_image() {
        let mut arbiter = arbiter_with(A, report("X", true, 10).with_image("img1"));
        arbiter.submit_report(A, report("X", true, 11).with_image("img2"));
        assert_eq!(arbiter.current().unwrap().image.as_deref(), Some("img2"));
    }

    #[test]
    fn test_new_title_discards_prior_image() {
        let mut arbiter = arbiter_with(A, report("X", true, 10).with_image("img1"));
        let outcome = arbiter.submit_report(A, report("Y", true, 11));
        assert_eq!(
            outcome,
            Outcome::Replaced {
                rule: "newer-same-play-state"
            }
        );
        let held = arbiter.current().unwrap();
        assert_eq!(held.title, "Y");
        assert_eq!(held.image, None);
    }

    #[test]
    fn test_same_title_from_other_source_moves_ownership() {
        let mut arbiter = arbiter_with(A, report("X", false, 10).with_image("img1"));
        arbiter.submit_report(B, report("X", true, 11));
        let held = arbiter.current().unwrap();
        assert_eq!(held.source_id, B);
        assert_eq!(held.image.as_deref(), Some("img1"));
    }

    #[test]
    fn test_held_record_never_has_blank_title() {
        let mut arbiter = Arbiter::new();
        let sequence = [
            (A, report("X", true, 1)),
            (B, MediaReport::empty()),
            (B, report("  ", true, 2)),
            (A, report("X", false, 3)),
            (B, report("Y", true, 2)),
            (A, MediaReport::empty()),
            (B, MediaReport::empty()),
            (A, report("Z", false, 9)),
        ];
        for (source, rep) in sequence {
            arbiter.submit_report(source, rep);
            if let Some(held) = arbiter.current() {
                assert!(!held.title.trim().is_empty());
            }
        }
        assert_eq!(arbiter.current().unwrap().title, "Z");
    }

    #[test]
    fn test_rule_order() {
        let names: Vec<_> = RULES.iter().map(|r| r.name).collect();
        assert_eq!(
            names,
            [
                "clear-own",
                "empty-state",
                "playing-beats-paused",
                "newer-same-play-state",
                "tracked-source"
            ]
        );
    }
}
