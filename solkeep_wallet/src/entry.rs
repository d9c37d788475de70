use std::{
    fmt::{self, Display, Formatter},
    str::FromStr
};
use serde::{Deserialize, Serialize};
use solkeep_common::{
    serializer::{Reader, ReaderError, Serializer, Writer},
    time::TimestampSeconds
};

// Explicit way to designate a wallet, parsed by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletRef {
    ById(u64),
    ByAddress(String)
}

impl Display for WalletRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::ById(id) => write!(f, "#{}", id),
            Self::ByAddress(address) => write!(f, "{}", address)
        }
    }
}

// A plain integer is an id, anything else is an address
impl FromStr for WalletRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty wallet reference".into())
        }

        let id = s.strip_prefix('#').unwrap_or(s);
        Ok(match id.parse::<u64>() {
            Ok(id) => Self::ById(id),
            Err(_) => Self::ByAddress(s.to_string())
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletRecord {
    pub id: u64,
    pub address: String,
    // base64 nonce || ciphertext of the seed
    pub encrypted_secret: String,
    pub label: Option<String>,
    // lamports, unknown until the first balance check
    pub last_balance: Option<u64>,
    pub last_checked_at: Option<TimestampSeconds>,
    pub created_at: TimestampSeconds
}

impl WalletRecord {
    pub fn display_name(&self) -> String {
        match &self.label {
            Some(label) => format!("#{} {} ({})", self.id, label, self.address),
            None => format!("#{} {}", self.id, self.address)
        }
    }
}

impl Serializer for WalletRecord {
    fn write(&self, writer: &mut Writer) {
        writer.write_u64(&self.id);
        writer.write_string(&self.address);
        writer.write_string(&self.encrypted_secret);
        writer.write_optional_string(&self.label);
        writer.write_optional_u64(&self.last_balance);
        writer.write_optional_u64(&self.last_checked_at);
        writer.write_u64(&self.created_at);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            id: reader.read_u64()?,
            address: reader.read_string()?,
            encrypted_secret: reader.read_string()?,
            label: reader.read_optional_string()?,
            last_balance: reader.read_optional_u64()?,
            last_checked_at: reader.read_optional_u64()?,
            created_at: reader.read_u64()?
        })
    }
}

// Wallet not yet stored, the store assigns its id
#[derive(Debug, Clone)]
pub struct NewWallet {
    pub address: String,
    pub encrypted_secret: String,
    pub label: Option<String>
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Incoming,
    Outgoing
}

impl TransactionKind {
    // Positive deltas are incoming, everything else is outgoing
    pub fn from_delta(delta: i64) -> Self {
        if delta > 0 {
            Self::Incoming
        } else {
            Self::Outgoing
        }
    }
}

impl Display for TransactionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incoming => write!(f, "incoming"),
            Self::Outgoing => write!(f, "outgoing")
        }
    }
}

impl Serializer for TransactionKind {
    fn write(&self, writer: &mut Writer) {
        writer.write_u8(match self {
            Self::Incoming => 0,
            Self::Outgoing => 1
        });
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(match reader.read_u8()? {
            0 => Self::Incoming,
            1 => Self::Outgoing,
            _ => return Err(ReaderError::InvalidValue)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub signature: String,
    pub wallet_id: u64,
    pub kind: TransactionKind,
    // lamports, negative for outgoing
    pub amount: i64,
    pub from_address: Option<String>,
    pub to_address: Option<String>,
    // lamports paid by the fee payer, only set for outgoing
    pub fee: Option<u64>,
    pub slot: Option<u64>,
    pub created_at: TimestampSeconds
}

impl TransactionRecord {
    // The other side of the transfer, when it is known
    pub fn counterpart(&self) -> Option<&str> {
        match self.kind {
            TransactionKind::Incoming => self.from_address.as_deref(),
            TransactionKind::Outgoing => self.to_address.as_deref()
        }
    }
}

impl Serializer for TransactionRecord {
    fn write(&self, writer: &mut Writer) {
        writer.write_string(&self.signature);
        writer.write_u64(&self.wallet_id);
        self.kind.write(writer);
        writer.write_i64(&self.amount);
        writer.write_optional_string(&self.from_address);
        writer.write_optional_string(&self.to_address);
        writer.write_optional_u64(&self.fee);
        writer.write_optional_u64(&self.slot);
        writer.write_u64(&self.created_at);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            signature: reader.read_string()?,
            wallet_id: reader.read_u64()?,
            kind: TransactionKind::read(reader)?,
            amount: reader.read_i64()?,
            from_address: reader.read_optional_string()?,
            to_address: reader.read_optional_string()?,
            fee: reader.read_optional_u64()?,
            slot: reader.read_optional_u64()?,
            created_at: reader.read_u64()?
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Fulfilled,
    Cancelled
}

impl Display for PaymentStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Fulfilled => write!(f, "fulfilled"),
            Self::Cancelled => write!(f, "cancelled")
        }
    }
}

impl Serializer for PaymentStatus {
    fn write(&self, writer: &mut Writer) {
        writer.write_u8(match self {
            Self::Pending => 0,
            Self::Fulfilled => 1,
            Self::Cancelled => 2
        });
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(match reader.read_u8()? {
            0 => Self::Pending,
            1 => Self::Fulfilled,
            2 => Self::Cancelled,
            _ => return Err(ReaderError::InvalidValue)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequestRecord {
    pub id: u64,
    pub wallet_id: u64,
    // lamports
    pub amount: u64,
    pub label: Option<String>,
    pub message: Option<String>,
    pub payment_uri: String,
    pub qr_code_url: String,
    pub status: PaymentStatus,
    pub created_at: TimestampSeconds,
    pub fulfilled_at: Option<TimestampSeconds>
}

impl Serializer for PaymentRequestRecord {
    fn write(&self, writer: &mut Writer) {
        writer.write_u64(&self.id);
        writer.write_u64(&self.wallet_id);
        writer.write_u64(&self.amount);
        writer.write_optional_string(&self.label);
        writer.write_optional_string(&self.message);
        writer.write_string(&self.payment_uri);
        writer.write_string(&self.qr_code_url);
        self.status.write(writer);
        writer.write_u64(&self.created_at);
        writer.write_optional_u64(&self.fulfilled_at);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            id: reader.read_u64()?,
            wallet_id: reader.read_u64()?,
            amount: reader.read_u64()?,
            label: reader.read_optional_string()?,
            message: reader.read_optional_string()?,
            payment_uri: reader.read_string()?,
            qr_code_url: reader.read_string()?,
            status: PaymentStatus::read(reader)?,
            created_at: reader.read_u64()?,
            fulfilled_at: reader.read_optional_u64()?
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewPaymentRequest {
    pub wallet_id: u64,
    pub amount: u64,
    pub label: Option<String>,
    pub message: Option<String>,
    pub payment_uri: String,
    pub qr_code_url: String
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_ref_parsing() {
        assert_eq!("42".parse::<WalletRef>().unwrap(), WalletRef::ById(42));
        assert_eq!("#7".parse::<WalletRef>().unwrap(), WalletRef::ById(7));
        assert_eq!(
            "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin".parse::<WalletRef>().unwrap(),
            WalletRef::ByAddress("9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin".to_string())
        );
        assert!("  ".parse::<WalletRef>().is_err());
    }

    #[test]
    fn test_counterpart_skips_own_address() {
        let mut tx = TransactionRecord {
            signature: "sig".to_string(),
            wallet_id: 1,
            kind: TransactionKind::Incoming,
            amount: 20,
            from_address: None,
            to_address: Some("own".to_string()),
            fee: None,
            slot: None,
            created_at: 0
        };
        assert_eq!(tx.counterpart(), None);

        tx.kind = TransactionKind::Outgoing;
        tx.amount = -20;
        tx.from_address = Some("own".to_string());
        tx.to_address = Some("destination".to_string());
        assert_eq!(tx.counterpart(), Some("destination"));
    }

    #[test]
    fn test_kind_from_delta() {
        assert_eq!(TransactionKind::from_delta(20), TransactionKind::Incoming);
        assert_eq!(TransactionKind::from_delta(-20), TransactionKind::Outgoing);
        assert_eq!(TransactionKind::from_delta(0), TransactionKind::Outgoing);
    }

    #[test]
    fn test_transaction_record_encoding() {
        let tx = TransactionRecord {
            signature: "5VERv8NMvzbJMEkV8xnrLkEaWRtSz9CosKDYjCJjBRnbJLgp8uirBgmQpjKhoR4tjF3ZpRzrFmBV6UjKdiSZkQUW".to_string(),
            wallet_id: 3,
            kind: TransactionKind::Outgoing,
            amount: -1_005_000,
            from_address: Some("from".to_string()),
            to_address: None,
            fee: Some(5000),
            slot: Some(1234),
            created_at: 1_700_000_000
        };

        let bytes = tx.to_bytes();
        assert_eq!(TransactionRecord::from_bytes(&bytes).unwrap(), tx);
        assert!(TransactionRecord::from_bytes(&bytes[..bytes.len() - 1]).is_err());
    }
}
