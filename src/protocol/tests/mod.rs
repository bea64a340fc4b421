mod ntp;
mod simple;
mod timestamp;
