/// Quality of service for a Publish. TARS scopes delivery to the two levels
/// the bus actually uses: fire-and-forget telemetry and acknowledged
/// commands. Exactly-once delivery is out of scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum QoS {
	AtMostOnce = 0,
	AtLeastOnce = 1,
}

#[derive(Debug)]
pub struct InvalidQoS(pub u8);

impl TryFrom<u8> for QoS {
	type Error = InvalidQoS;
	fn try_from(value: u8) -> Result<Self, Self::Error> {
		match value {
			0 => Ok(Self::AtMostOnce),
			1 => Ok(Self::AtLeastOnce),
			other => Err(InvalidQoS(other)),
		}
	}
}
