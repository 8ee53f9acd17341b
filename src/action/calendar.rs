use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeDelta, TimeZone, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tracing::{error, info};

use crate::{
    action::{ActionError, ActionHandler},
    flow::{Variables, session::Session},
};

/// How far ahead free slots are offered.
pub const LOOKAHEAD_HOURS: i64 = 72;
pub const SLOT_DAYS: i64 = 3;
pub const OPEN_HOUR: u32 = 9;
pub const CLOSE_HOUR: u32 = 17;
pub const MAX_SLOTS: usize = 3;

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("slot starting {0} overlaps an existing appointment")]
    Conflict(DateTime<Utc>),
    #[error("calendar backend unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && self.end > other.start
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appointment {
    pub when: TimeRange,
    pub summary: String,
    pub description: String,
}

/// A tenant's bookable calendar.
#[async_trait]
pub trait CalendarBackend: Send + Sync {
    /// Busy ranges that intersect `window`.
    async fn busy(&self, tenant: &str, window: TimeRange) -> Result<Vec<TimeRange>, CalendarError>;

    async fn book(&self, tenant: &str, appointment: Appointment) -> Result<(), CalendarError>;
}

/// Keeps appointments in memory, per tenant. Used for development and tests.
#[derive(Debug, Default)]
pub struct InMemoryCalendar {
    appointments: DashMap<String, Vec<Appointment>>,
}

impl InMemoryCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn appointments(&self, tenant: &str) -> Vec<Appointment> {
        self.appointments
            .get(tenant)
            .map(|a| a.value().clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CalendarBackend for InMemoryCalendar {
    async fn busy(&self, tenant: &str, window: TimeRange) -> Result<Vec<TimeRange>, CalendarError> {
        Ok(self
            .appointments(tenant)
            .into_iter()
            .map(|a| a.when)
            .filter(|when| when.overlaps(&window))
            .collect())
    }

    async fn book(&self, tenant: &str, appointment: Appointment) -> Result<(), CalendarError> {
        let mut booked = self.appointments.entry(tenant.to_string()).or_default();
        if booked.iter().any(|a| a.when.overlaps(&appointment.when)) {
            return Err(CalendarError::Conflict(appointment.when.start));
        }
        booked.push(appointment);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    /// Option id shown to the user, `SLOT_1`..`SLOT_3`.
    pub id: String,
    /// Short label such as `Mon 16 12:00`.
    pub text: String,
    /// RFC 3339 start, carrying the local offset.
    pub iso: String,
}

/// One-hour slots between opening and closing time on today and the next two
/// days, skipping anything already started or overlapping `busy`.
pub fn free_slots(now: DateTime<FixedOffset>, busy: &[TimeRange]) -> Vec<Slot> {
    let offset = *now.offset();
    let mut slots = Vec::new();

    for d in 0..SLOT_DAYS {
        let day = now.date_naive() + TimeDelta::days(d);
        for hour in OPEN_HOUR..CLOSE_HOUR {
            let Some(start) = day
                .and_hms_opt(hour, 0, 0)
                .and_then(|t| offset.from_local_datetime(&t).single())
            else {
                continue;
            };
            if start < now {
                continue;
            }
            let slot = TimeRange {
                start: start.with_timezone(&Utc),
                end: (start + TimeDelta::hours(1)).with_timezone(&Utc),
            };
            if busy.iter().any(|b| b.overlaps(&slot)) {
                continue;
            }

            slots.push(Slot {
                id: format!("SLOT_{}", slots.len() + 1),
                text: start.format("%a %d %H:%M").to_string(),
                iso: start.to_rfc3339(),
            });
            if slots.len() >= MAX_SLOTS {
                return slots;
            }
        }
    }
    slots
}

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Offers the next free slots as `slot_1..slot_3` labels plus hidden
/// `SLOT_n_ISO` timestamps for [`ScheduleAppointment`] to read back.
pub struct GetCalendarSlots {
    backend: Arc<dyn CalendarBackend>,
    offset: FixedOffset,
    clock: Clock,
}

impl GetCalendarSlots {
    pub fn new(backend: Arc<dyn CalendarBackend>, offset: FixedOffset) -> Self {
        Self {
            backend,
            offset,
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl ActionHandler for GetCalendarSlots {
    async fn run(
        &self,
        tenant: &str,
        _user: &str,
        _session: &Session,
    ) -> Result<Variables, ActionError> {
        let now = (self.clock)().with_timezone(&self.offset);
        let window = TimeRange {
            start: now.with_timezone(&Utc),
            end: now.with_timezone(&Utc) + TimeDelta::hours(LOOKAHEAD_HOURS),
        };

        let busy = match self.backend.busy(tenant, window).await {
            Ok(busy) => busy,
            Err(e) => {
                // degrade to a visible placeholder instead of failing the step
                error!(tenant, error = %e, "calendar query failed");
                let mut vars = unfilled_slots();
                vars.insert("slot_1".to_string(), "Calendar unavailable".to_string());
                return Ok(vars);
            }
        };

        let mut vars = unfilled_slots();
        for (i, slot) in free_slots(now, &busy).into_iter().enumerate() {
            vars.insert(format!("slot_{}", i + 1), slot.text);
            vars.insert(format!("{}_ISO", slot.id), slot.iso);
        }
        Ok(vars)
    }
}

/// Placeholder labels and blank timestamps for every position.
fn unfilled_slots() -> Variables {
    let mut vars = Variables::new();
    for n in 1..=MAX_SLOTS {
        let label = if n == 1 { "No slots" } else { "-" };
        vars.insert(format!("slot_{n}"), label.to_string());
        vars.insert(format!("SLOT_{n}_ISO"), String::new());
    }
    vars
}

/// Books the slot the user just picked, one hour long.
pub struct ScheduleAppointment {
    backend: Arc<dyn CalendarBackend>,
}

impl ScheduleAppointment {
    pub fn new(backend: Arc<dyn CalendarBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ActionHandler for ScheduleAppointment {
    async fn run(
        &self,
        tenant: &str,
        user: &str,
        session: &Session,
    ) -> Result<Variables, ActionError> {
        let data = &session.data;
        let selected = data
            .last_selected_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(ActionError::NoSelection)?;
        let iso = data
            .get(&format!("{selected}_ISO"))
            .filter(|iso| !iso.trim().is_empty())
            .ok_or_else(|| ActionError::UnknownSlot(selected.to_string()))?;
        let start = DateTime::parse_from_rfc3339(iso)
            .map_err(|_| ActionError::InvalidSlot(iso.to_string()))?
            .with_timezone(&Utc);

        let name = data
            .get("client_name")
            .filter(|n| !n.is_empty())
            .or(data.contact_name.as_deref())
            .unwrap_or("WhatsApp contact");

        info!(tenant, user, slot = iso, "booking appointment");
        self.backend
            .book(
                tenant,
                Appointment {
                    when: TimeRange {
                        start,
                        end: start + TimeDelta::hours(1),
                    },
                    summary: format!("Appointment: {name}"),
                    description: format!("Booked via WhatsApp.\nPhone: {user}"),
                },
            )
            .await?;

        Ok(Variables::from([(
            "appointment_confirm_time".to_string(),
            iso.to_string(),
        )]))
    }
}
