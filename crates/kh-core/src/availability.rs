use crate::error::{KhError, Result};
use crate::types::{Agent, AgentSchedule};
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// `is_available` is a pure function of agent flags, the global flag,
/// schedule rows, and the instant `t` (spec.md §4.7, testable property §8).
pub fn is_available(
    agent: &Agent,
    global_scheduling_enabled: bool,
    schedules: &[AgentSchedule],
    t_utc: DateTime<Utc>,
) -> bool {
    if !agent.scheduling_enabled || !global_scheduling_enabled {
        return true;
    }

    let day = t_utc.weekday().num_days_from_sunday() as u8;
    let Some(row) = schedules
        .iter()
        .find(|s| s.agent_id == agent.id && s.day_of_week == day)
    else {
        return false;
    };
    if !row.is_active {
        return false;
    }

    let Some(start) = parse_hhmm(&row.start_time_utc) else {
        return false;
    };
    let Some(end) = parse_hhmm(&row.end_time_utc) else {
        return false;
    };
    let m = t_utc.time();

    if start <= end {
        start <= m && m < end
    } else {
        // Overnight span crossing midnight.
        m >= start || m < end
    }
}

fn parse_hhmm(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").ok()
}

/// Converts a schedule authored in local time + IANA zone to the UTC
/// `start_time_utc`/`end_time_utc` strings stored on an `AgentSchedule`.
/// Anchors to the next occurrence of `day_of_week` so DST offset at
/// creation time is captured correctly; later DST transitions cause at
/// most a one-hour drift per year (accepted per spec.md §4.7).
pub fn local_to_utc_schedule(
    day_of_week: u8,
    local_start: &str,
    local_end: &str,
    tz_name: &str,
    anchor_date: NaiveDate,
) -> Result<(String, String)> {
    let tz: Tz = tz_name
        .parse()
        .map_err(|_| KhError::Validation(format!("unknown IANA timezone: {tz_name}")))?;

    let anchor = next_occurrence_of(anchor_date, day_of_week)?;

    let start = local_time_on(&tz, anchor, local_start)?;
    let end = local_time_on(&tz, anchor, local_end)?;

    Ok((
        start.with_timezone(&Utc).format("%H:%M").to_string(),
        end.with_timezone(&Utc).format("%H:%M").to_string(),
    ))
}

fn next_occurrence_of(from: NaiveDate, day_of_week: u8) -> Result<NaiveDate> {
    if day_of_week > 6 {
        return Err(KhError::Validation(format!("invalid day_of_week: {day_of_week}")));
    }
    let from_dow = from.weekday().num_days_from_sunday() as u8;
    let delta = (7 + day_of_week as i64 - from_dow as i64) % 7;
    Ok(from + chrono::Duration::days(delta))
}

fn local_time_on(tz: &Tz, date: NaiveDate, hhmm: &str) -> Result<DateTime<Tz>> {
    let t = parse_hhmm(hhmm).ok_or_else(|| KhError::Validation(format!("invalid HH:MM: {hhmm}")))?;
    let naive = date.and_hms_opt(t.hour(), t.minute(), 0).ok_or_else(|| {
        KhError::Validation(format!("invalid time-of-day: {hhmm}"))
    })?;
    tz.from_local_datetime(&naive)
        .single()
        .ok_or_else(|| KhError::Validation(format!("ambiguous local time during DST: {hhmm}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn agent(id: i64, scheduling_enabled: bool) -> Agent {
        let mut a = Agent::new("a", "key");
        a.id = id;
        a.scheduling_enabled = scheduling_enabled;
        a
    }

    #[test]
    fn scheduling_disabled_is_always_available() {
        let a = agent(1, false);
        let t = Utc.with_ymd_and_hms(2026, 7, 30, 12, 0, 0).unwrap();
        assert!(is_available(&a, true, &[], t));
    }

    #[test]
    fn global_disabled_overrides_per_agent_schedule() {
        let a = agent(1, true);
        let t = Utc.with_ymd_and_hms(2026, 7, 30, 12, 0, 0).unwrap();
        assert!(is_available(&a, false, &[], t));
    }

    #[test]
    fn missing_schedule_row_means_unavailable() {
        let a = agent(1, true);
        let t = Utc.with_ymd_and_hms(2026, 7, 30, 12, 0, 0).unwrap();
        assert!(!is_available(&a, true, &[], t));
    }

    #[test]
    fn within_same_day_window_is_available() {
        let a = agent(1, true);
        let t = Utc.with_ymd_and_hms(2026, 7, 30, 12, 0, 0).unwrap(); // Thursday
        let schedules = vec![AgentSchedule {
            agent_id: 1,
            day_of_week: t.weekday().num_days_from_sunday() as u8,
            start_time_utc: "09:00".into(),
            end_time_utc: "17:00".into(),
            is_active: true,
            source_timezone: "UTC".into(),
        }];
        assert!(is_available(&a, true, &schedules, t));
    }

    #[test]
    fn overnight_window_wraps_past_midnight() {
        let a = agent(1, true);
        let t = Utc.with_ymd_and_hms(2026, 7, 30, 23, 30, 0).unwrap();
        let schedules = vec![AgentSchedule {
            agent_id: 1,
            day_of_week: t.weekday().num_days_from_sunday() as u8,
            start_time_utc: "22:00".into(),
            end_time_utc: "06:00".into(),
            is_active: true,
            source_timezone: "UTC".into(),
        }];
        assert!(is_available(&a, true, &schedules, t));
    }

    #[test]
    fn local_to_utc_round_trips_outside_dst_transitions() {
        let anchor = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(); // a Monday
        let (start_utc, end_utc) =
            local_to_utc_schedule(1, "09:00", "17:00", "America/New_York", anchor).unwrap();
        // In January, America/New_York is UTC-5.
        assert_eq!(start_utc, "14:00");
        assert_eq!(end_utc, "22:00");
    }

    #[test]
    fn unknown_timezone_is_a_validation_error() {
        let anchor = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        let err = local_to_utc_schedule(1, "09:00", "17:00", "Not/AZone", anchor).unwrap_err();
        assert!(matches!(err, KhError::Validation(_)));
    }
}
