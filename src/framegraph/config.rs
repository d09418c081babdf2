use super::error::{GraphError, GraphResult};

pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;
pub const DEFAULT_HEAP_ALIGNMENT_FLOOR: u64 = 64 * 1024;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GraphConfig {
    pub frames_in_flight: usize,
    pub heap_alignment_floor: u64,
    /// Log the heap assignment of every build at info level.
    pub log_plan: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            heap_alignment_floor: DEFAULT_HEAP_ALIGNMENT_FLOOR,
            log_plan: true,
        }
    }
}

impl GraphConfig {
    pub fn frames_in_flight(mut self, frames_in_flight: usize) -> Self {
        self.frames_in_flight = frames_in_flight;
        self
    }

    pub fn heap_alignment_floor(mut self, heap_alignment_floor: u64) -> Self {
        self.heap_alignment_floor = heap_alignment_floor;
        self
    }

    pub fn log_plan(mut self, log_plan: bool) -> Self {
        self.log_plan = log_plan;
        self
    }

    pub fn validate(&self) -> GraphResult<()> {
        if self.frames_in_flight == 0 {
            return Err(GraphError::InvalidConfig {
                reason: "at least one frame in flight is required".to_owned(),
            });
        }
        if !self.heap_alignment_floor.is_power_of_two() {
            return Err(GraphError::InvalidConfig {
                reason: format!(
                    "heap alignment floor {} is not a power of two",
                    self.heap_alignment_floor
                ),
            });
        }
        Ok(())
    }
}
