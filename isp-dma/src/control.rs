/// Clock and power collaborator of the pipeline.
///
/// The pipeline calls [`enable()`](Self::enable) when the first port starts
/// streaming and [`disable()`](Self::disable) when the last one stops, and
/// never otherwise. Both run in process context with the stream sequencing
/// lock held, so they may block.
pub trait PowerControl {
    /// Ungate clocks and power up the DMA block.
    fn enable(&mut self);

    /// Gate clocks and power down the DMA block.
    fn disable(&mut self);
}

/// Power control for blocks whose clocks are managed elsewhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOn;

impl PowerControl for AlwaysOn {
    fn enable(&mut self) {}

    fn disable(&mut self) {}
}

/// Adapts a closure taking the new power state.
///
/// ```ignore
/// let power = PowerFn(|on| clocks.set_isp_gate(on));
/// ```
pub struct PowerFn<F>(pub F);

impl<F: FnMut(bool)> PowerControl for PowerFn<F> {
    fn enable(&mut self) {
        (self.0)(true)
    }

    fn disable(&mut self) {
        (self.0)(false)
    }
}
