// Frame synchronizer
//
// N frame slots, each with an image-acquired semaphore, a render-finished
// semaphore and a fence. begin_frame waits on the slot's fence (last signalled
// by the frame N submissions ago), releases that slot's retained command
// lists, acquires an image and only then resets the fence. end_frame presents
// and moves to the next slot.

use ash::vk;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{GpuDevice, Presenter, Submission};
use crate::command_list::CommandList;
use crate::error::{Result, RhiError};
use crate::render_target::RenderTarget;
use crate::retention::RetentionLedger;

/// Upper bound on configurable frames in flight
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

/// Synchronization primitives for one frame in flight
pub struct FrameSlot {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
    /// Work was submitted against `in_flight` and not yet observed complete
    pub pending: bool,
}

impl FrameSlot {
    fn new(device: &dyn GpuDevice) -> Result<Self> {
        // Fence starts signaled so the first wait on each slot returns at once
        Ok(Self {
            image_available: device.create_semaphore()?,
            render_finished: device.create_semaphore()?,
            in_flight: device.create_fence(true)?,
            pending: false,
        })
    }

    fn destroy(&self, device: &dyn GpuDevice) {
        device.destroy_semaphore(self.image_available);
        device.destroy_semaphore(self.render_finished);
        device.destroy_fence(self.in_flight);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Begun { image_index: u32, submitted: bool },
}

pub struct FrameSynchronizer {
    device: Arc<dyn GpuDevice>,
    slots: Vec<FrameSlot>,
    current: usize,
    phase: Phase,
    timeout: Duration,
    frame_number: u64,
}

impl FrameSynchronizer {
    pub fn new(
        device: Arc<dyn GpuDevice>,
        frames_in_flight: usize,
        image_count: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let max = MAX_FRAMES_IN_FLIGHT.min(image_count);
        if frames_in_flight == 0 || frames_in_flight > max {
            return Err(RhiError::FramesInFlight {
                requested: frames_in_flight,
                max,
            });
        }

        let mut slots = Vec::with_capacity(frames_in_flight);
        for _ in 0..frames_in_flight {
            match FrameSlot::new(device.as_ref()) {
                Ok(slot) => slots.push(slot),
                Err(err) => {
                    for slot in &slots {
                        slot.destroy(device.as_ref());
                    }
                    return Err(err);
                }
            }
        }

        log::info!(
            "Frame synchronizer: {} frame(s) in flight over {} presentable image(s)",
            frames_in_flight,
            image_count
        );

        Ok(Self {
            device,
            slots,
            current: 0,
            phase: Phase::Idle,
            timeout,
            frame_number: 0,
        })
    }

    pub fn begin_frame(
        &mut self,
        presenter: &mut dyn Presenter,
        ledger: &mut RetentionLedger,
    ) -> Result<RenderTarget> {
        if self.phase != Phase::Idle {
            return Err(RhiError::FrameOrder {
                op: "begin_frame",
                reason: "the previous frame was not ended",
            });
        }

        let slot = &mut self.slots[self.current];
        self.device.wait_for_fence(slot.in_flight, self.timeout)?;
        slot.pending = false;
        ledger.release(self.current);

        // A failed acquire leaves the fence signaled so the next wait cannot hang
        let acquired = presenter.acquire_next_image(slot.image_available, self.timeout)?;
        if acquired.suboptimal {
            log::warn!("Swapchain is suboptimal for the surface");
        }
        self.device.reset_fence(slot.in_flight)?;

        self.phase = Phase::Begun {
            image_index: acquired.index,
            submitted: false,
        };
        log::debug!(
            "Frame {} begins on slot {} with image {}",
            self.frame_number,
            self.current,
            acquired.index
        );

        Ok(RenderTarget {
            image_index: acquired.index,
            view: presenter.image_view(acquired.index),
            extent: presenter.extent(),
            format: presenter.format(),
        })
    }

    fn frame_submission(&self, command_buffer: Option<vk::CommandBuffer>) -> Submission {
        let slot = &self.slots[self.current];
        Submission {
            command_buffer,
            wait: Some((slot.image_available, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)),
            signal: Some(slot.render_finished),
            fence: Some(slot.in_flight),
        }
    }

    /// Submit the frame's command list and park it in the ledger
    pub fn submit(&mut self, mut command_list: CommandList, ledger: &mut RetentionLedger) -> Result<()> {
        let Phase::Begun { image_index, submitted: false } = self.phase else {
            return Err(RhiError::FrameOrder {
                op: "submit",
                reason: "submit needs a begun frame with nothing submitted yet",
            });
        };
        if command_list.state() != crate::command_list::CommandListState::Ended {
            return Err(RhiError::InvalidState {
                op: "submit",
                state: command_list.state(),
            });
        }

        self.device
            .submit(&self.frame_submission(Some(command_list.command_buffer())))?;
        command_list.mark_submitted()?;
        ledger.retain(self.current, command_list);

        self.slots[self.current].pending = true;
        self.phase = Phase::Begun {
            image_index,
            submitted: true,
        };
        Ok(())
    }

    /// Present the frame and advance to the next slot. Returns whether the
    /// surface reported itself suboptimal.
    pub fn end_frame(&mut self, presenter: &mut dyn Presenter) -> Result<bool> {
        let Phase::Begun { image_index, submitted } = self.phase else {
            return Err(RhiError::FrameOrder {
                op: "end_frame",
                reason: "no frame was begun",
            });
        };

        if !submitted {
            // Keep the semaphore/fence chain intact for frames with no work
            self.device.submit(&self.frame_submission(None))?;
            self.slots[self.current].pending = true;
        }

        let presented = presenter.present(image_index, self.slots[self.current].render_finished);

        self.phase = Phase::Idle;
        self.current = (self.current + 1) % self.slots.len();
        self.frame_number += 1;

        presented
    }

    /// Wait for every pending slot, e.g. before tearing down or resizing
    pub fn wait_all(&mut self) -> Result<()> {
        for slot in &mut self.slots {
            if slot.pending {
                self.device.wait_for_fence(slot.in_flight, self.timeout)?;
                slot.pending = false;
            }
        }
        Ok(())
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    pub fn current_slot(&self) -> usize {
        self.current
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn in_frame(&self) -> bool {
        self.phase != Phase::Idle
    }

    pub fn slot(&self, index: usize) -> &FrameSlot {
        &self.slots[index]
    }
}

impl Drop for FrameSynchronizer {
    fn drop(&mut self) {
        for slot in &self.slots {
            slot.destroy(self.device.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DeviceEvent;
    use crate::config::Config;
    use crate::error::ErrorKind;
    use crate::testing::Fixture;

    fn empty_list(fixture: &Fixture, target: &RenderTarget) -> CommandList {
        let mut commands = fixture.rhi.create_command_list().unwrap();
        commands.begin().unwrap();
        commands.begin_render_pass(target).unwrap();
        commands.end_render_pass().unwrap();
        commands.end().unwrap();
        commands
    }

    #[test]
    fn test_scenario_b_third_frame_waits_on_first() {
        let mut fixture = Fixture::new();
        let first_fence = fixture.rhi.frames().slot(0).in_flight;
        fixture.device.take_events();

        for frame in 0..5 {
            let target = fixture.rhi.begin_frame().unwrap();
            assert!(fixture.rhi.outstanding() <= 2);

            if frame == 2 {
                let waits = fixture.device.fence_waits();
                assert_eq!(waits.last(), Some(&(first_fence, true)));
            }

            let commands = empty_list(&fixture, &target);
            fixture.rhi.submit(commands).unwrap();
            fixture.rhi.end_frame().unwrap();
            assert!(fixture.rhi.outstanding() <= 2);
        }

        // Frames 0 and 1 start on fresh signaled fences; from frame 2 on every
        // begin_frame blocks on the frame two submissions back
        let blocked: Vec<bool> = fixture
            .device
            .fence_waits()
            .iter()
            .map(|&(_, blocked)| blocked)
            .collect();
        assert_eq!(blocked, vec![false, false, true, true, true]);
    }

    #[test]
    fn test_reclaims_slot_after_fence() {
        let mut fixture = Fixture::new();

        fixture.rhi.begin_frame().unwrap();
        let buffer = fixture.rhi.create_buffer(16, crate::resource::BufferUsage::Vertex).unwrap();
        let handle = buffer.handle();
        let mut commands = fixture.rhi.create_command_list().unwrap();
        commands.begin().unwrap();
        commands.bind_vertex_buffer(&buffer, 0).unwrap();
        commands.end().unwrap();
        drop(buffer);

        fixture.rhi.submit(commands).unwrap();
        fixture.rhi.end_frame().unwrap();
        assert!(fixture.device.is_live_buffer(handle));

        // Slot 1 does not touch slot 0's work
        fixture.rhi.begin_frame().unwrap();
        fixture.rhi.end_frame().unwrap();
        assert!(fixture.device.is_live_buffer(handle));

        // Back on slot 0: fence observed, buffer released
        fixture.rhi.begin_frame().unwrap();
        assert!(!fixture.device.is_live_buffer(handle));
        fixture.rhi.end_frame().unwrap();
    }

    #[test]
    fn test_empty_frame_still_submits() {
        let mut fixture = Fixture::new();
        fixture.device.take_events();

        fixture.rhi.begin_frame().unwrap();
        fixture.rhi.end_frame().unwrap();

        let submits: Vec<DeviceEvent> = fixture
            .device
            .take_events()
            .into_iter()
            .filter(|event| matches!(event, DeviceEvent::Submit { .. }))
            .collect();
        assert_eq!(submits.len(), 1);
        assert!(matches!(
            submits[0],
            DeviceEvent::Submit { command_buffer: None, fence: Some(_), signal: Some(_), .. }
        ));
    }

    #[test]
    fn test_frame_order_misuse() {
        let mut fixture = Fixture::new();
        assert!(matches!(fixture.rhi.end_frame(), Err(RhiError::FrameOrder { .. })));

        let target = fixture.rhi.begin_frame().unwrap();
        let err = fixture.rhi.begin_frame().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProgrammerMisuse);

        let first = empty_list(&fixture, &target);
        let second = empty_list(&fixture, &target);
        fixture.rhi.submit(first).unwrap();
        assert!(matches!(fixture.rhi.submit(second), Err(RhiError::FrameOrder { .. })));
        fixture.rhi.end_frame().unwrap();
    }

    #[test]
    fn test_submit_requires_ended_list() {
        let mut fixture = Fixture::new();
        fixture.rhi.begin_frame().unwrap();

        let mut commands = fixture.rhi.create_command_list().unwrap();
        commands.begin().unwrap();
        assert!(matches!(
            fixture.rhi.submit(commands),
            Err(RhiError::InvalidState { state: crate::command_list::CommandListState::Recording, .. })
        ));
        fixture.rhi.end_frame().unwrap();
    }

    #[test]
    fn test_frames_in_flight_bounds() {
        for requested in [0, MAX_FRAMES_IN_FLIGHT + 1] {
            let mut config = Config::default();
            config.graphics.frames_in_flight = requested;
            let err = Fixture::try_with_config(config).err().unwrap();
            assert!(matches!(err, RhiError::FramesInFlight { .. }));
            assert_eq!(err.kind(), ErrorKind::ResourceExhaustion);
        }

        // More frames than presentable images
        let mut config = Config::default();
        config.graphics.frames_in_flight = 3;
        let err = Fixture::try_with_images(config, 2).err().unwrap();
        assert!(matches!(err, RhiError::FramesInFlight { requested: 3, max: 2 }));
    }

    #[test]
    fn test_failed_acquire_leaves_fence_signaled() {
        let mut fixture = Fixture::new();

        fixture.rhi.begin_frame().unwrap();
        fixture.rhi.end_frame().unwrap();
        fixture.rhi.begin_frame().unwrap();
        fixture.rhi.end_frame().unwrap();

        fixture.surface_control().fail_next_acquire();
        let err = fixture.rhi.begin_frame().unwrap_err();
        assert!(matches!(err, RhiError::SurfaceOutOfDate));

        fixture.rhi.resize(640, 480).unwrap();
        // The fence was waited on but never reset, so this does not time out
        fixture.rhi.begin_frame().unwrap();
        fixture.rhi.end_frame().unwrap();
    }

    #[test]
    fn test_unsignaled_fence_times_out() {
        let fixture = Fixture::new();
        let fence = fixture.device.create_fence(false).unwrap();
        let err = fixture
            .device
            .wait_for_fence(fence, Duration::from_millis(5))
            .unwrap_err();
        assert!(matches!(err, RhiError::SyncTimeout { .. }));
        assert_eq!(err.kind(), ErrorKind::Device);
        fixture.device.destroy_fence(fence);
    }
}
