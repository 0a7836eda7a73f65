use mockall::mock;
use tilesim_core::dram::BackingStore;

mock! {
    /// DRAM line storage with scripted behaviour.
    pub Store {}

    impl BackingStore for Store {
        fn read_line(&mut self, address: u64, buf: &mut [u8]);
        fn write_line(&mut self, address: u64, data: &[u8]);
    }
}

impl std::fmt::Debug for MockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockStore").finish_non_exhaustive()
    }
}
