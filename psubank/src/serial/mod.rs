use crate::common::phys::PhysLayer;

pub(crate) mod channel;
pub(crate) mod frame;

/// Serial line settings of the power supplies
pub(crate) mod settings {
    pub(crate) const BAUD_RATE: u32 = 19200;
    pub(crate) const DATA_BITS: tokio_serial::DataBits = tokio_serial::DataBits::Eight;
    pub(crate) const PARITY: tokio_serial::Parity = tokio_serial::Parity::Even;
    pub(crate) const STOP_BITS: tokio_serial::StopBits = tokio_serial::StopBits::One;
    pub(crate) const FLOW_CONTROL: tokio_serial::FlowControl = tokio_serial::FlowControl::None;
}

pub(crate) fn open(path: &str) -> Result<PhysLayer, tokio_serial::Error> {
    let builder = tokio_serial::new(path, settings::BAUD_RATE)
        .data_bits(settings::DATA_BITS)
        .parity(settings::PARITY)
        .stop_bits(settings::STOP_BITS)
        .flow_control(settings::FLOW_CONTROL);
    let stream = tokio_serial::SerialStream::open(&builder)?;
    Ok(PhysLayer::new_serial(stream))
}
