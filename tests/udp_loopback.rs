//! End-to-end streaming over localhost UDP with the real send and receive tasks

use std::time::{Duration, Instant};

use remote_iq_streamer::{
    config::{NetworkConfig, ReceiverConfig, SenderConfig},
    network::{FrameReceiver, FrameSender},
    protocol::FRAME_DATA_SIZE,
    receiver::{create_shared_buffer, ReadController, SharedReceiverBuffer},
    sample::{format::pack, IqSample, SampleWidth},
    sender::{create_shared_fifo, FramePipeline},
};

const SAMPLES_PER_FRAME: usize = FRAME_DATA_SIZE / 4;
const NB_FRAMES: usize = 6;

fn ramp(count: usize) -> Vec<IqSample> {
    (0..count as i32)
        .map(|n| IqSample::new(n % 30_000, -(n % 20_000)))
        .collect()
}

async fn wait_decoded(buffer: &SharedReceiverBuffer, frame_index: u16) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);

    while Instant::now() < deadline {
        if buffer
            .lock()
            .slot(frame_index)
            .is_some_and(|slot| slot.is_decoded())
        {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

async fn stream_ramp() -> (FrameReceiver, SharedReceiverBuffer, ReceiverConfig) {
    let receiver_config = ReceiverConfig {
        nb_decoder_slots: 8,
        ..Default::default()
    };
    let buffer = create_shared_buffer(&receiver_config);

    let mut receiver = FrameReceiver::new(buffer.clone());
    receiver
        .start(&NetworkConfig {
            data_port: 0,
            recv_buffer_size: Some(4 * 1024 * 1024),
            ..Default::default()
        })
        .await
        .unwrap();
    let port = receiver.local_addr().unwrap().port();

    let sender_config = SenderConfig {
        tx_delay_percent: 20,
        ..Default::default()
    };
    let fifo = create_shared_fifo(sender_config.fifo_depth);
    let mut pipeline = FramePipeline::new(&sender_config, SampleWidth::Bits16, fifo.clone()).unwrap();
    let mut sender = FrameSender::new(fifo);
    sender
        .start(
            &NetworkConfig {
                data_port: port,
                ..Default::default()
            },
            &sender_config,
        )
        .await
        .unwrap();

    pipeline.feed(&ramp(NB_FRAMES * SAMPLES_PER_FRAME));
    assert_eq!(pipeline.stats().frames_built, NB_FRAMES as u64);

    assert!(wait_decoded(&buffer, NB_FRAMES as u16 - 1).await);
    sender.stop().await;

    (receiver, buffer, receiver_config)
}

#[tokio::test]
async fn test_frames_arrive_intact() {
    let (mut receiver, buffer, _) = stream_ramp().await;

    let samples = ramp(NB_FRAMES * SAMPLES_PER_FRAME);
    let mut expected = Vec::new();
    pack(SampleWidth::Bits16, &samples, &mut expected);

    {
        let buffer = buffer.lock();
        let meta = buffer.current_meta();
        assert_eq!(meta.sample_rate, 48_000);
        assert_eq!(meta.nb_original_blocks, 128);
        assert_eq!(meta.nb_fec_blocks, 8);

        for frame in 0..NB_FRAMES {
            let data = buffer.frame_data(frame as u16).unwrap();
            let start = frame * FRAME_DATA_SIZE;
            assert!(
                data == &expected[start..start + FRAME_DATA_SIZE],
                "frame {} differs",
                frame
            );
        }
    }

    let stats = receiver.stats();
    assert_eq!(stats.malformed, 0);
    assert_eq!(stats.format_changes, 1);

    receiver.stop().await;
}

#[tokio::test]
async fn test_reader_delivers_stream() {
    let (mut receiver, buffer, config) = stream_ramp().await;

    let (tx, rx) = crossbeam_channel::unbounded::<Vec<IqSample>>();
    let mut sink = tx;
    let mut controller = ReadController::new(&config, buffer.clone()).unwrap();

    for _ in 0..10 {
        controller.tick_elapsed(Duration::from_millis(50), &mut sink);
    }

    // no correction before the first estimate: 50 ms at 48 kS/s per tick
    let chunks: Vec<Vec<IqSample>> = rx.try_iter().collect();
    assert_eq!(chunks.len(), 10);
    assert!(chunks.iter().all(|c| c.len() == 2_400));
    assert_eq!(controller.samples_delivered(), 24_000);

    receiver.stop().await;
}
