/// A set of reusable buffers for Z39.50 PDU exchange
///
/// `Conn` uses a single `BufferSet` for all its operations.
#[derive(Debug)]
pub struct BufferSet {
    /// The last PDU read from the server
    /// Bytes are valid during an operation.
    pub read_buffer: Vec<u8>,

    /// The next PDU to send
    /// Bytes are valid during an operation.
    write_buffer: Vec<u8>,
}

impl BufferSet {
    /// Create a new empty buffer set
    pub fn new() -> Self {
        Self {
            read_buffer: Vec::new(),
            write_buffer: Vec::new(),
        }
    }

    /// Clear the write buffer and return mutable access.
    #[inline]
    pub fn new_write_buffer(&mut self) -> &mut Vec<u8> {
        self.write_buffer.clear();
        &mut self.write_buffer
    }

    /// Get the write buffer for sending.
    #[inline]
    pub fn write_buffer(&self) -> &[u8] {
        &self.write_buffer
    }
}

impl Default for BufferSet {
    fn default() -> Self {
        Self::new()
    }
}
