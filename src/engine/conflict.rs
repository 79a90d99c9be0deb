use crate::model::*;

/// Which occupants of a partition count as blocking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictScope {
    /// Schedule entries and every hold still active.
    AllActive,
    /// Like `AllActive`, but the caller's own hold does not block itself.
    ExcludingHold(HoldToken),
    /// Durable schedule entries only.
    ScheduleOnly,
}

/// Every occupant of `day` that overlaps `span` at instant `now`.
///
/// Half-open overlap: `a.start < b.end && b.start < a.end`, so ranges that only
/// touch at an endpoint never conflict. A hold counts only while
/// `expires_at > now`.
pub fn conflicts(day: &DaySchedule, span: &Span, now: Ms, scope: ConflictScope) -> Vec<Conflict> {
    day.overlapping(span)
        .filter_map(|interval| match &interval.kind {
            IntervalKind::Scheduled { booking_id } => Some(Conflict {
                span: interval.span,
                kind: ConflictKind::Scheduled {
                    booking_id: *booking_id,
                },
            }),
            IntervalKind::Hold { .. } if scope == ConflictScope::ScheduleOnly => None,
            IntervalKind::Hold { expires_at, .. } if *expires_at <= now => None,
            IntervalKind::Hold { token, .. } if scope == ConflictScope::ExcludingHold(*token) => {
                None
            }
            IntervalKind::Hold {
                token, expires_at, ..
            } => Some(Conflict {
                span: interval.span,
                kind: ConflictKind::Hold {
                    token: *token,
                    expires_at: *expires_at,
                },
            }),
        })
        .collect()
}

pub fn has_conflict(day: &DaySchedule, span: &Span, now: Ms, scope: ConflictScope) -> bool {
    day.overlapping(span).any(|interval| match &interval.kind {
        IntervalKind::Scheduled { .. } => true,
        IntervalKind::Hold { token, expires_at, .. } => {
            *expires_at > now
                && scope != ConflictScope::ScheduleOnly
                && scope != ConflictScope::ExcludingHold(*token)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use ulid::Ulid;

    fn t(h: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, 0, 0).unwrap()
    }

    fn day_with(hold_expires_at: Ms) -> (DaySchedule, HoldToken) {
        let key = DayKey::new(1, NaiveDate::from_ymd_opt(2025, 12, 1).unwrap());
        let mut day = DaySchedule::new(key);
        day.insert_entry(&ScheduleEntry {
            resource_id: 1,
            date: key.date,
            span: Span::new(t(14), t(16)),
            booking_id: 42,
        });
        let token = Ulid::new();
        day.insert_hold(&HoldRecord {
            token,
            resource_id: 1,
            date: key.date,
            span: Span::new(t(18), t(19)),
            owner: "kiosk".into(),
            created_at: 0,
            expires_at: hold_expires_at,
        });
        (day, token)
    }

    #[test]
    fn overlapping_schedule_entry_conflicts() {
        let (day, _) = day_with(1_000);
        let span = Span::new(t(15), t(17));
        let found = conflicts(&day, &span, 0, ConflictScope::AllActive);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, ConflictKind::Scheduled { booking_id: 42 });
        assert!(has_conflict(&day, &span, 0, ConflictScope::ScheduleOnly));
    }

    #[test]
    fn touching_ranges_do_not_conflict() {
        let (day, _) = day_with(1_000);
        assert!(!has_conflict(&day, &Span::new(t(16), t(18)), 0, ConflictScope::AllActive));
        assert!(!has_conflict(&day, &Span::new(t(12), t(14)), 0, ConflictScope::AllActive));
    }

    #[test]
    fn active_hold_conflicts_until_expiry() {
        let (day, token) = day_with(1_000);
        let span = Span::new(t(18), t(20));
        assert!(has_conflict(&day, &span, 999, ConflictScope::AllActive));
        assert!(!has_conflict(&day, &span, 1_000, ConflictScope::AllActive));
        assert!(conflicts(&day, &span, 1_000, ConflictScope::AllActive).is_empty());
        assert!(matches!(
            conflicts(&day, &span, 0, ConflictScope::AllActive)[0].kind,
            ConflictKind::Hold { token: t, .. } if t == token
        ));
    }

    #[test]
    fn own_hold_is_excluded() {
        let (day, token) = day_with(1_000);
        let span = Span::new(t(18), t(19));
        assert!(!has_conflict(&day, &span, 0, ConflictScope::ExcludingHold(token)));
        assert!(has_conflict(&day, &span, 0, ConflictScope::ExcludingHold(Ulid::new())));
        assert!(!has_conflict(&day, &span, 0, ConflictScope::ScheduleOnly));
    }

    #[test]
    fn empty_partition_has_no_conflicts() {
        let key = DayKey::new(9, NaiveDate::from_ymd_opt(2025, 12, 1).unwrap());
        let day = DaySchedule::new(key);
        assert!(!has_conflict(&day, &Span::new(t(0), t(23)), 0, ConflictScope::AllActive));
    }
}
