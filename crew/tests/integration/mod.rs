mod autoflush_test;
mod batch_test;
mod queue_test;
mod trigger_test;
mod worker_test;
