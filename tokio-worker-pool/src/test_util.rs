use crate::Job;

pub(crate) fn init_logging() {
    // another test may have installed it already
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub(crate) struct TestJob {
    id: usize,
    f: Box<dyn FnOnce() -> Result<usize, String> + Send>,
}

impl TestJob {
    pub(crate) fn new(id: usize, f: impl FnOnce() -> Result<usize, String> + Send + 'static) -> Self {
        TestJob { id, f: Box::new(f) }
    }

    pub(crate) fn ok(id: usize) -> Self {
        TestJob::new(id, move || Ok(id))
    }

    pub(crate) fn fail(id: usize) -> Self {
        TestJob::new(id, move || Err(format!("job {id} failed")))
    }

    pub(crate) fn panic(id: usize) -> Self {
        TestJob::new(id, move || panic!("job {id} panicked"))
    }
}

impl Job for TestJob {
    type Id = usize;
    type Output = usize;
    type Error = String;

    fn id(&self) -> usize {
        self.id
    }

    fn run(self) -> Result<usize, String> {
        (self.f)()
    }
}
