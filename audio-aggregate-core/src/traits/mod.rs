pub mod blocking_stream;
pub mod device_stream;
