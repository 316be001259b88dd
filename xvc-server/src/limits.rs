/// The three independent caps on the size of a single driver exchange, in bytes.
///
/// A value of `0` means the corresponding party imposes no limit.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct VectorLimits {
    /// The ceiling configured for the connection and advertised to the client.
    pub connection: u32,
    /// The transport buffer size of the driver.
    pub driver: u32,
    /// The limit reported by the target, e.g. its FIFO depth.
    pub target: u32,
}

impl VectorLimits {
    /// The chunk size used to split shifts: the smallest non-zero limit.
    /// Returns `0` only if no party imposes a limit.
    pub fn effective(&self) -> u32 {
        [self.connection, self.driver, self.target]
            .into_iter()
            .filter(|&limit| limit != 0)
            .min()
            .unwrap_or(0)
    }
}
