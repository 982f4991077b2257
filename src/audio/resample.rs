//! Linear resampler for devices that cannot run at the wire rate

/// Streaming linear-interpolation resampler for mono audio
///
/// Keeps the fractional read position and the last input sample between
/// calls so consecutive buffers join without clicks.
pub struct LinearResampler {
    from_rate: u32,
    to_rate: u32,
    /// Position of the next output sample, in input samples, relative to `last`
    position: f64,
    last: Option<f32>,
}

impl LinearResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            from_rate: from_rate.max(1),
            to_rate: to_rate.max(1),
            position: 0.0,
            last: None,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.from_rate == self.to_rate
    }

    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if self.is_passthrough() || input.is_empty() {
            return input.to_vec();
        }

        let step = self.from_rate as f64 / self.to_rate as f64;

        // Prepend the carried-over sample so interpolation can span buffers
        let mut source = Vec::with_capacity(input.len() + 1);
        if let Some(last) = self.last {
            source.push(last);
        }
        source.extend_from_slice(input);

        let mut output = Vec::with_capacity((input.len() as f64 / step).ceil() as usize + 1);
        while self.position + 1.0 < source.len() as f64 {
            let index = self.position.floor() as usize;
            let frac = (self.position - index as f64) as f32;
            let a = source[index];
            let b = source[index + 1];
            output.push(a + (b - a) * frac);
            self.position += step;
        }

        self.position -= (source.len() - 1) as f64;
        self.last = source.last().copied();
        output
    }

    /// Emit the output positions past the last input sample, holding that
    /// sample, and start over
    pub fn flush(&mut self) -> Vec<f32> {
        let mut output = Vec::new();
        if let Some(last) = self.last.take() {
            let step = self.from_rate as f64 / self.to_rate as f64;
            while self.position < 1.0 {
                output.push(last);
                self.position += step;
            }
        }
        self.position = 0.0;
        output
    }
}

/// One-shot resample of a whole buffer
///
/// Produces `ceil(len * to_rate / from_rate)` samples.
pub fn resample(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    let mut resampler = LinearResampler::new(from_rate, to_rate);
    let mut output = resampler.process(input);
    output.extend(resampler.flush());
    output
}
