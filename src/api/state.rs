use crate::scheduler::ScheduleService;

#[derive(Clone)]
pub struct AppState {
    pub schedules: ScheduleService,
}
