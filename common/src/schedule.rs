use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const SCHEDULE_CAPACITY: usize = 5;
pub const DEFAULT_SCHEDULE: [u8; 3] = [7, 12, 17];

/// Watering hours of the day, bounded to [`SCHEDULE_CAPACITY`] entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleHours {
    hours: [u8; SCHEDULE_CAPACITY],
    count: usize,
}

impl ScheduleHours {
    pub fn empty() -> Self {
        Self {
            hours: [0; SCHEDULE_CAPACITY],
            count: 0,
        }
    }

    /// Keeps entries within 0-23 in order, then caps at capacity.
    pub fn from_hours<I>(hours: I) -> Self
    where
        I: IntoIterator<Item = i64>,
    {
        let mut schedule = Self::empty();
        for hour in hours {
            if !is_valid_hour(hour) {
                continue;
            }
            if !schedule.push(hour as u8) {
                break;
            }
        }
        schedule
    }

    pub fn push(&mut self, hour: u8) -> bool {
        if self.count >= SCHEDULE_CAPACITY || !is_valid_hour(i64::from(hour)) {
            return false;
        }
        self.hours[self.count] = hour;
        self.count += 1;
        true
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.hours[..self.count]
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Entries equal to `hour`; coincident entries are each yielded.
    pub fn matching(&self, hour: u8) -> impl Iterator<Item = u8> + '_ {
        self.as_slice()
            .iter()
            .copied()
            .filter(move |entry| *entry == hour)
    }
}

impl Default for ScheduleHours {
    fn default() -> Self {
        Self::from_hours(DEFAULT_SCHEDULE.iter().map(|hour| i64::from(*hour)))
    }
}

pub fn is_valid_hour(hour: i64) -> bool {
    (0..=23).contains(&hour)
}

impl Serialize for ScheduleHours {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.as_slice())
    }
}

impl<'de> Deserialize<'de> for ScheduleHours {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hours = Vec::<i64>::deserialize(deserializer)?;
        Ok(Self::from_hours(hours))
    }
}
