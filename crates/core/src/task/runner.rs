/// A unit of work that consumes itself when run.
///
/// Implemented by long-running loops such as the partition receiver and by
/// the per-message executor dispatched onto the worker pool.
pub trait Runner {
    type Error;
    fn run(self) -> impl std::future::Future<Output = Result<(), Self::Error>> + Send
    where
        Self: Sized;
}
