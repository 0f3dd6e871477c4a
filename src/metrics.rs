/// Counters for one rendered document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub pages: usize,
    pub instances: usize,
}

impl RenderStats {
    pub fn record_page(&mut self, instances: usize) {
        self.pages += 1;
        self.instances += instances;
    }
}
