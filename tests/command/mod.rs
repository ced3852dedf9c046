mod cancellation;
mod concurrency;
mod global;
