use std::time::Duration;

use camemu_buffer::{
    BufferPool, DataType, FrameHeader, RegionLayout, SharedRegion, FRAME_HEADER_LEN,
};

#[test]
fn consumer_reads_frames_the_producer_wrote() {
    let dir = tempfile::tempdir().expect("tempdir should be creatable");
    let layout = RegionLayout::new(2, 256).expect("layout");
    let pool = BufferPool::new(
        SharedRegion::create_in(dir.path(), "frame_producer", layout).expect("create region"),
    )
    .expect("pool");

    let payload: Vec<u8> = (0..=99).collect();
    let header = FrameHeader {
        frame_number: 0,
        width: 10,
        height: 10,
        data_type: DataType::Uint8,
        payload_size: payload.len() as u32,
    };
    let slot = pool.acquire(Duration::from_millis(10)).expect("acquire");
    pool.write_frame(slot, &header, &payload).expect("write frame");
    pool.hand_off(slot).expect("hand off");

    let consumer = SharedRegion::open_in(dir.path(), "frame_producer").expect("open region");
    assert_eq!(consumer.layout(), layout);
    let buffer = consumer.buffer(slot.index()).expect("buffer");
    let seen = FrameHeader::decode(buffer).expect("decode header");
    assert_eq!(seen, header);
    assert_eq!(
        &buffer[FRAME_HEADER_LEN..FRAME_HEADER_LEN + seen.payload_size as usize],
        payload.as_slice()
    );

    pool.reclaim(slot).expect("consumer release");
    assert_eq!(pool.stats().free, 2);
}

#[test]
fn pool_reports_region_name() {
    let dir = tempfile::tempdir().expect("tempdir should be creatable");
    let layout = RegionLayout::new(1, 64).expect("layout");
    let pool = BufferPool::new(
        SharedRegion::create_in(dir.path(), "named_pool", layout).expect("create region"),
    )
    .expect("pool");
    assert_eq!(pool.name(), Some("named_pool"));
    assert_eq!(pool.capacity(), 1);
    assert_eq!(pool.max_payload(), 64 - FRAME_HEADER_LEN);
}
