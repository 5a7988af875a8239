//! Runtime-selected numeric kernels for bulk component math.
//!
//! The registry holds one function pointer per workload, chosen once from
//! the detected CPU capability. Kernels operate on the contiguous column
//! slices archetype storage already provides.

/// Widest vector extension available on this machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SimdCapability {
    Scalar,
    Sse2,
    Avx2,
    Avx512,
}

impl SimdCapability {
    /// Detect the best capability of the running CPU.
    #[cfg(target_arch = "x86_64")]
    pub fn detect() -> Self {
        if is_x86_feature_detected!("avx512f") {
            SimdCapability::Avx512
        } else if is_x86_feature_detected!("avx2") {
            SimdCapability::Avx2
        } else if is_x86_feature_detected!("sse2") {
            SimdCapability::Sse2
        } else {
            SimdCapability::Scalar
        }
    }

    /// Detect the best capability of the running CPU.
    #[cfg(not(target_arch = "x86_64"))]
    pub fn detect() -> Self {
        SimdCapability::Scalar
    }

    /// Lane count for f32 workloads at this capability.
    pub fn f32_lanes(self) -> usize {
        match self {
            SimdCapability::Scalar => 1,
            SimdCapability::Sse2 => 4,
            SimdCapability::Avx2 => 8,
            SimdCapability::Avx512 => 16,
        }
    }
}

type ScaleFn = fn(&mut [f32], f32);
type AxpyFn = fn(&mut [f32], &[f32], f32);

/// One selected implementation per workload.
pub struct KernelRegistry {
    capability: SimdCapability,
    scale_f32: ScaleFn,
    axpy_f32: AxpyFn,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::with_capability(SimdCapability::detect())
    }

    /// Force a capability; used by tests to pin the dispatch.
    pub fn with_capability(capability: SimdCapability) -> Self {
        let (scale_f32, axpy_f32): (ScaleFn, AxpyFn) = match capability {
            SimdCapability::Scalar => (scale_scalar, axpy_scalar),
            _ => (scale_chunked, axpy_chunked),
        };
        Self {
            capability,
            scale_f32,
            axpy_f32,
        }
    }

    pub fn capability(&self) -> SimdCapability {
        self.capability
    }

    /// `data[i] *= factor`
    pub fn scale_f32(&self, data: &mut [f32], factor: f32) {
        (self.scale_f32)(data, factor)
    }

    /// `dst[i] += src[i] * factor`
    pub fn axpy_f32(&self, dst: &mut [f32], src: &[f32], factor: f32) {
        (self.axpy_f32)(dst, src, factor)
    }
}

impl Default for KernelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn scale_scalar(data: &mut [f32], factor: f32) {
    for v in data {
        *v *= factor;
    }
}

fn scale_chunked(data: &mut [f32], factor: f32) {
    let mut chunks = data.chunks_exact_mut(8);
    for chunk in &mut chunks {
        for v in chunk {
            *v *= factor;
        }
    }
    for v in chunks.into_remainder() {
        *v *= factor;
    }
}

fn axpy_scalar(dst: &mut [f32], src: &[f32], factor: f32) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d += s * factor;
    }
}

fn axpy_chunked(dst: &mut [f32], src: &[f32], factor: f32) {
    let n = dst.len().min(src.len());
    let (dst, src) = (&mut dst[..n], &src[..n]);
    let mut d_chunks = dst.chunks_exact_mut(8);
    let mut s_chunks = src.chunks_exact(8);
    for (d, s) in (&mut d_chunks).zip(&mut s_chunks) {
        for i in 0..8 {
            d[i] += s[i] * factor;
        }
    }
    for (d, s) in d_chunks.into_remainder().iter_mut().zip(s_chunks.remainder()) {
        *d += s * factor;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_matches_across_capabilities() {
        let input: Vec<f32> = (0..19).map(|i| i as f32).collect();
        let mut scalar = input.clone();
        let mut chunked = input.clone();

        KernelRegistry::with_capability(SimdCapability::Scalar).scale_f32(&mut scalar, 2.5);
        KernelRegistry::with_capability(SimdCapability::Avx2).scale_f32(&mut chunked, 2.5);

        assert_eq!(scalar, chunked);
    }

    #[test]
    fn test_axpy() {
        let registry = KernelRegistry::with_capability(SimdCapability::Avx2);
        let mut dst = vec![1.0; 10];
        let src: Vec<f32> = (0..10).map(|i| i as f32).collect();
        registry.axpy_f32(&mut dst, &src, 2.0);
        assert_eq!(dst[0], 1.0);
        assert_eq!(dst[9], 19.0);
    }

    #[test]
    fn test_detection_runs() {
        let registry = KernelRegistry::new();
        assert!(registry.capability().f32_lanes() >= 1);
    }
}
