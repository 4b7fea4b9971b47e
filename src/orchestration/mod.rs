pub mod dispatcher;
pub mod guard;
pub mod plan;
pub mod planner;
pub mod pool;
pub mod round;
