#[derive(Default)]
pub struct Writer {
    bytes: Vec<u8>
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_bool(&mut self, value: bool) {
        self.bytes.push(u8::from(value));
    }

    pub fn write_u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    pub fn write_u32(&mut self, value: &u32) {
        self.bytes.extend(value.to_be_bytes());
    }

    pub fn write_u64(&mut self, value: &u64) {
        self.bytes.extend(value.to_be_bytes());
    }

    pub fn write_i64(&mut self, value: &i64) {
        self.bytes.extend(value.to_be_bytes());
    }

    // Length on 4 bytes then the UTF-8 bytes
    pub fn write_string(&mut self, value: &str) {
        self.write_u32(&(value.len() as u32));
        self.bytes.extend(value.as_bytes());
    }

    pub fn write_optional_string(&mut self, opt: &Option<String>) {
        self.write_bool(opt.is_some());
        if let Some(v) = opt {
            self.write_string(v);
        }
    }

    pub fn write_optional_u64(&mut self, opt: &Option<u64>) {
        self.write_bool(opt.is_some());
        if let Some(v) = opt {
            self.write_u64(v);
        }
    }

    pub fn total_write(&self) -> usize {
        self.bytes.len()
    }

    pub fn bytes(self) -> Vec<u8> {
        self.bytes
    }
}
