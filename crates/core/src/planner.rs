use chrono::offset::LocalResult;
use chrono::{DateTime, Days, Duration, FixedOffset, Local, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};

//
// ─── CONSTANTS ─────────────────────────────────────────────────────────────────
//

/// Weight units covered by one revision session.
pub const WEIGHT_PER_SESSION: f64 = 10.0;

/// Shortest look-back window, in days, regardless of session count.
pub const MIN_SPAN_DAYS: u32 = 3;

/// Longest look-back window, in days, regardless of session count.
pub const MAX_SPAN_DAYS: u32 = 14;

/// Local wall-clock hour at which every session starts.
pub const SESSION_START_HOUR: u32 = 18;

/// Length of every generated session.
pub const SESSION_LENGTH_MINUTES: i64 = 60;

//
// ─── WINDOWS ───────────────────────────────────────────────────────────────────
//

/// One generated study slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StudyWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl StudyWindow {
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// True when the two windows share any instant.
    #[must_use]
    pub fn overlaps(&self, other: &StudyWindow) -> bool {
        self.start < other.end && other.start < self.end
    }
}

//
// ─── SHAPE ─────────────────────────────────────────────────────────────────────
//

/// How many sessions a weight produces and over how many days they spread.
///
/// # Examples
///
/// ```
/// # use revise_core::planner::PlanShape;
/// let shape = PlanShape::for_weight(25.0).unwrap();
/// assert_eq!(shape.sessions, 3);
/// assert_eq!(shape.span_days, 6);
/// assert_eq!(shape.offsets().collect::<Vec<_>>(), vec![4, 3, 1]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanShape {
    pub sessions: u32,
    pub span_days: u32,
}

impl PlanShape {
    /// Derive the shape for `weight`.
    ///
    /// Returns `None` for zero, negative or non-finite weights: such exams get
    /// no plan.
    #[must_use]
    pub fn for_weight(weight: f64) -> Option<Self> {
        if !weight.is_finite() || weight <= 0.0 {
            return None;
        }
        let raw = (weight / WEIGHT_PER_SESSION).ceil().min(f64::from(u32::MAX));
        // raw is finite, positive and capped at u32::MAX
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let sessions = (raw as u32).max(1);
        let span_days = sessions
            .saturating_mul(2)
            .clamp(MIN_SPAN_DAYS, MAX_SPAN_DAYS);
        Some(Self {
            sessions,
            span_days,
        })
    }

    /// Days between the exam date and the session with position `i`
    /// (`1..=sessions`): `floor(span_days / (sessions + 1) * i)`, computed in
    /// floating point.
    #[must_use]
    // non-negative and below span_days for i <= sessions
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn day_offset(&self, i: u32) -> u32 {
        let step = f64::from(self.span_days) / (f64::from(self.sessions) + 1.0);
        (step * f64::from(i)).floor() as u32
    }

    /// Offsets in output order: largest offset (furthest from the exam) first.
    pub fn offsets(&self) -> impl Iterator<Item = u32> + '_ {
        (1..=self.sessions).rev().map(|i| self.day_offset(i))
    }
}

//
// ─── ZONE ──────────────────────────────────────────────────────────────────────
//

/// Time zone whose wall clock pins sessions at 18:00.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlanZone {
    /// The machine's local zone.
    #[default]
    Local,
    Fixed(FixedOffset),
}

impl PlanZone {
    #[must_use]
    pub fn utc() -> Self {
        Self::Fixed(Utc.fix())
    }

    /// Fixed zone `minutes` east of UTC. `None` when out of range (±24h).
    #[must_use]
    pub fn from_offset_minutes(minutes: i32) -> Option<Self> {
        minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .map(Self::Fixed)
    }

    fn session_start(self, exam_at: DateTime<Utc>, day_offset: u32) -> DateTime<Utc> {
        match self {
            Self::Local => session_start_in(&Local, exam_at, day_offset),
            Self::Fixed(offset) => session_start_in(&offset, exam_at, day_offset),
        }
    }
}

fn session_start_in<Tz: TimeZone>(tz: &Tz, exam_at: DateTime<Utc>, day_offset: u32) -> DateTime<Utc> {
    let exam_day = exam_at.with_timezone(tz).date_naive();
    let day = exam_day
        .checked_sub_days(Days::new(u64::from(day_offset)))
        .unwrap_or(exam_day);
    let wall = day.and_time(NaiveTime::MIN) + Duration::hours(i64::from(SESSION_START_HOUR));
    resolve_wall_time(tz, wall)
}

fn resolve_wall_time<Tz: TimeZone>(tz: &Tz, wall: NaiveDateTime) -> DateTime<Utc> {
    match tz.from_local_datetime(&wall) {
        LocalResult::Single(at) | LocalResult::Ambiguous(at, _) => at.with_timezone(&Utc),
        // 18:00 skipped by a DST jump: move forward past the gap
        LocalResult::None => tz
            .from_local_datetime(&(wall + Duration::hours(1)))
            .earliest()
            .map_or_else(|| wall.and_utc(), |at| at.with_timezone(&Utc)),
    }
}

//
// ─── GENERATOR ─────────────────────────────────────────────────────────────────
//

/// Session count and span for `weight`, or `None` when it cannot be planned.
#[must_use]
pub fn plan_shape(weight: f64) -> Option<PlanShape> {
    PlanShape::for_weight(weight)
}

/// Compute the revision windows for an exam.
///
/// Returns an empty plan when the date is missing or the weight is missing,
/// zero, negative or not finite. Otherwise returns exactly
/// `max(1, ceil(weight / 10))` one-hour windows starting at 18:00 in `zone`,
/// ordered from the furthest from the exam to the closest.
///
/// # Examples
///
/// ```
/// # use chrono::{TimeZone, Utc};
/// # use revise_core::planner::{generate_plan, PlanZone};
/// let exam = Utc.with_ymd_and_hms(2024, 6, 10, 0, 0, 0).unwrap();
/// let plan = generate_plan(Some(exam), Some(25.0), PlanZone::utc());
/// assert_eq!(plan.len(), 3);
/// assert_eq!(plan[0].start, Utc.with_ymd_and_hms(2024, 6, 6, 18, 0, 0).unwrap());
/// ```
#[must_use]
pub fn generate_plan(
    scheduled_at: Option<DateTime<Utc>>,
    weight: Option<f64>,
    zone: PlanZone,
) -> Vec<StudyWindow> {
    let (Some(exam_at), Some(shape)) = (scheduled_at, weight.and_then(plan_shape))
    else {
        return Vec::new();
    };

    shape
        .offsets()
        .map(|offset| {
            let start = zone.session_start(exam_at, offset);
            StudyWindow {
                start,
                end: start + Duration::minutes(SESSION_LENGTH_MINUTES),
            }
        })
        .collect()
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
