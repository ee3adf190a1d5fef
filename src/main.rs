#![recursion_limit = "256"]

use clap::Parser;
use mnist_lessons::cli::Cli;

#[cfg(feature = "wgpu")]
mod backend {
    use burn::backend::wgpu::{Wgpu, WgpuDevice};

    pub type Backend = Wgpu;

    pub fn device() -> WgpuDevice {
        WgpuDevice::default()
    }
}

#[cfg(all(any(feature = "tch-cpu", feature = "tch-gpu"), not(feature = "wgpu")))]
mod backend {
    use burn::backend::libtorch::{LibTorch, LibTorchDevice};

    pub type Backend = LibTorch;

    #[cfg(feature = "tch-gpu")]
    pub fn device() -> LibTorchDevice {
        #[cfg(not(target_os = "macos"))]
        let device = LibTorchDevice::Cuda(0);
        #[cfg(target_os = "macos")]
        let device = LibTorchDevice::Mps;

        device
    }

    #[cfg(not(feature = "tch-gpu"))]
    pub fn device() -> LibTorchDevice {
        LibTorchDevice::Cpu
    }
}

#[cfg(not(any(feature = "wgpu", feature = "tch-cpu", feature = "tch-gpu")))]
mod backend {
    use burn::backend::ndarray::{NdArray, NdArrayDevice};

    pub type Backend = NdArray;

    pub fn device() -> NdArrayDevice {
        NdArrayDevice::Cpu
    }
}

fn main() -> mnist_lessons::Result<()> {
    let cli = Cli::parse();
    cli.run::<backend::Backend>(backend::device())
}
