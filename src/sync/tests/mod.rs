mod calibration;
mod registry;
