/// Re-chunks a sample stream into fixed-size frames.
#[derive(Debug)]
pub struct Framer {
    frame_samples: usize,
    pending: Vec<f32>,
}

impl Framer {
    pub fn new(frame_samples: usize) -> Self {
        let frame_samples = frame_samples.max(1);
        Self {
            frame_samples,
            pending: Vec::with_capacity(frame_samples * 2),
        }
    }

    /// Returns every complete frame now available; the rest waits.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);
        let mut frames = Vec::with_capacity(self.pending.len() / self.frame_samples);
        while self.pending.len() >= self.frame_samples {
            frames.push(self.pending.drain(..self.frame_samples).collect());
        }
        frames
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
