pub mod device_ctx;
pub mod frame_ctx;
