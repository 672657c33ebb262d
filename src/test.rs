pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub fn init_logger() {
    use tracing_subscriber::layer::SubscriberExt;
    let subscriber = tracing_subscriber::Registry::default()
        .with(tracing_subscriber::fmt::layer().with_test_writer());
    // Tests share one process, so only the first call installs the subscriber.
    let _ = tracing::subscriber::set_global_default(subscriber);
}
