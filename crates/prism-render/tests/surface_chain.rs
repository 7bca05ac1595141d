// SPDX-License-Identifier: CEPL-1.0
use std::collections::BTreeSet;

use prism_render::{ChainBackend, RebuildOutcome, RenderSize, SurfaceChain, SwapchainParts};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Kind {
    Swapchain,
    View,
    RenderTarget,
    Depth,
    Framebuffer,
}

struct FakeSwapchain {
    id: u64,
    images: Vec<u64>,
    format: u32,
    size: RenderSize,
}

impl SwapchainParts for FakeSwapchain {
    type Image = u64;
    type Format = u32;

    fn images(&self) -> &[u64] {
        &self.images
    }

    fn format(&self) -> u32 {
        self.format
    }

    fn size(&self) -> RenderSize {
        self.size
    }
}

/// Tracks every live object so leaks and double frees show up.
#[derive(Default)]
struct FakeDevice {
    next_id: u64,
    live: BTreeSet<(Kind, u64)>,
    idle_waits: usize,
    format: u32,
    fail_framebuffer_at: Option<usize>,
    framebuffers_made: usize,
    log: Vec<&'static str>,
}

impl FakeDevice {
    fn make(&mut self, kind: Kind) -> u64 {
        self.next_id += 1;
        assert!(self.live.insert((kind, self.next_id)));
        self.next_id
    }

    fn free(&mut self, kind: Kind, id: u64) {
        assert!(self.live.remove(&(kind, id)), "double free of {kind:?} {id}");
    }

    fn live(&self, kind: Kind) -> usize {
        self.live.iter().filter(|(k, _)| *k == kind).count()
    }
}

impl ChainBackend for FakeDevice {
    type Error = &'static str;
    type Swapchain = FakeSwapchain;
    type View = u64;
    type RenderTarget = u64;
    type Depth = u64;
    type Framebuffer = u64;

    fn wait_idle(&mut self) -> Result<(), Self::Error> {
        self.idle_waits += 1;
        self.log.push("wait_idle");
        Ok(())
    }

    fn create_swapchain(&mut self, window: RenderSize) -> Result<FakeSwapchain, Self::Error> {
        // Bigger surfaces get an extra image, like a compositor might.
        let count = if window.width > 1000 { 3 } else { 2 };
        let id = self.make(Kind::Swapchain);
        self.log.push("create_swapchain");
        Ok(FakeSwapchain {
            id,
            images: (0..count).map(|i| id * 10 + i).collect(),
            format: self.format,
            size: window,
        })
    }

    fn create_view(&mut self, _sc: &FakeSwapchain, _image: u64) -> Result<u64, Self::Error> {
        Ok(self.make(Kind::View))
    }

    fn create_render_target(&mut self, _sc: &FakeSwapchain) -> Result<u64, Self::Error> {
        Ok(self.make(Kind::RenderTarget))
    }

    fn create_depth(&mut self, _sc: &FakeSwapchain) -> Result<u64, Self::Error> {
        Ok(self.make(Kind::Depth))
    }

    fn create_framebuffer(
        &mut self,
        _target: &u64,
        _view: &u64,
        _depth: &u64,
        _size: RenderSize,
    ) -> Result<u64, Self::Error> {
        if self.fail_framebuffer_at == Some(self.framebuffers_made) {
            return Err("framebuffer creation failed");
        }
        self.framebuffers_made += 1;
        Ok(self.make(Kind::Framebuffer))
    }

    fn destroy_framebuffer(&mut self, fb: u64) {
        self.log.push("destroy_framebuffer");
        self.free(Kind::Framebuffer, fb);
    }

    fn destroy_depth(&mut self, depth: u64) {
        self.log.push("destroy_depth");
        self.free(Kind::Depth, depth);
    }

    fn destroy_view(&mut self, view: u64) {
        self.log.push("destroy_view");
        self.free(Kind::View, view);
    }

    fn destroy_render_target(&mut self, target: u64) {
        self.log.push("destroy_render_target");
        self.free(Kind::RenderTarget, target);
    }

    fn destroy_swapchain(&mut self, sc: FakeSwapchain) {
        self.log.push("destroy_swapchain");
        self.free(Kind::Swapchain, sc.id);
    }
}

fn assert_consistent(chain: &SurfaceChain<FakeDevice>, device: &FakeDevice) {
    let images = chain.image_count();
    assert_eq!(chain.views().len(), images);
    assert_eq!(chain.framebuffers().len(), images);
    assert_eq!(device.live(Kind::Swapchain), 1);
    assert_eq!(device.live(Kind::View), images);
    assert_eq!(device.live(Kind::Framebuffer), images);
    assert_eq!(device.live(Kind::Depth), 1);
    assert_eq!(device.live(Kind::RenderTarget), 1);
}

#[test]
fn resize_sequence_keeps_counts_consistent_without_leaks() {
    let mut device = FakeDevice::default();
    let mut chain = SurfaceChain::build(&mut device, RenderSize::new(800, 600)).unwrap();
    assert_consistent(&chain, &device);

    let sizes = [
        RenderSize::new(1280, 720),
        RenderSize::new(640, 480),
        RenderSize::new(1920, 1080),
        RenderSize::new(1, 1),
    ];
    for size in sizes {
        let (next, outcome) = chain.rebuild(&mut device, size).unwrap();
        chain = next;
        assert_eq!(
            outcome,
            RebuildOutcome::Rebuilt {
                format_changed: false
            }
        );
        assert_eq!(chain.size(), size);
        assert_consistent(&chain, &device);
    }
    assert_eq!(device.idle_waits, sizes.len());

    chain.destroy(&mut device);
    assert!(device.live.is_empty(), "leaked {:?}", device.live);
}

#[test]
fn teardown_runs_in_reverse_after_idle_wait() {
    let mut device = FakeDevice::default();
    let chain = SurfaceChain::build(&mut device, RenderSize::new(800, 600)).unwrap();
    device.log.clear();

    let (chain, _) = chain.rebuild(&mut device, RenderSize::new(400, 300)).unwrap();
    let expected_prefix = [
        "wait_idle",
        "destroy_framebuffer",
        "destroy_framebuffer",
        "destroy_depth",
        "destroy_view",
        "destroy_view",
        "destroy_render_target",
        "destroy_swapchain",
        "create_swapchain",
    ];
    assert_eq!(&device.log[..expected_prefix.len()], &expected_prefix);
    chain.destroy(&mut device);
}

#[test]
fn zero_sized_window_defers_and_keeps_the_chain() {
    let mut device = FakeDevice::default();
    let chain = SurfaceChain::build(&mut device, RenderSize::new(800, 600)).unwrap();
    let before: Vec<u64> = chain.framebuffers().to_vec();

    let (chain, outcome) = chain.rebuild(&mut device, RenderSize::new(0, 600)).unwrap();
    assert_eq!(outcome, RebuildOutcome::Deferred);
    assert_eq!(chain.framebuffers(), &before[..]);
    assert_eq!(device.idle_waits, 0);
    assert_consistent(&chain, &device);
    chain.destroy(&mut device);
}

#[test]
fn format_change_is_reported() {
    let mut device = FakeDevice::default();
    let chain = SurfaceChain::build(&mut device, RenderSize::new(800, 600)).unwrap();
    device.format = 44;
    let (chain, outcome) = chain.rebuild(&mut device, RenderSize::new(800, 600)).unwrap();
    assert_eq!(
        outcome,
        RebuildOutcome::Rebuilt {
            format_changed: true
        }
    );
    assert_eq!(chain.format(), 44);
    chain.destroy(&mut device);
}

#[test]
fn failed_build_releases_partial_graph() {
    let mut device = FakeDevice {
        fail_framebuffer_at: Some(1),
        ..FakeDevice::default()
    };
    let result = SurfaceChain::build(&mut device, RenderSize::new(800, 600));
    assert!(matches!(result, Err("framebuffer creation failed")));
    assert!(device.live.is_empty(), "leaked {:?}", device.live);
}

#[test]
fn failed_rebuild_leaves_nothing_alive() {
    let mut device = FakeDevice::default();
    let chain = SurfaceChain::build(&mut device, RenderSize::new(800, 600)).unwrap();
    device.fail_framebuffer_at = Some(device.framebuffers_made);
    assert!(chain.rebuild(&mut device, RenderSize::new(1280, 720)).is_err());
    assert!(device.live.is_empty(), "leaked {:?}", device.live);
}
