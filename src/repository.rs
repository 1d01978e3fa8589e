//! Sled-backed storage for per-loan exchange state
use super::agreement::{PickupAgreement, ReturnAgreement};
use super::closure::ClosureFlags;
use super::progress::ProofProgress;
use std::sync::Arc;
use tracing::debug;

const LOAN_PREFIX: &str = "loan/";

/// Everything this crate knows about one loan, encoded as CBOR.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct LoanRecord {
    #[n(0)]
    pub loan_id: String,
    #[n(1)]
    pub pickup: PickupAgreement,
    #[n(2)]
    pub handback: ReturnAgreement,
    #[n(3)]
    pub progress: ProofProgress,
    #[n(4)]
    pub closure: ClosureFlags,
}

impl LoanRecord {
    pub fn new(loan_id: impl Into<String>) -> Self {
        Self {
            loan_id: loan_id.into(),
            pickup: PickupAgreement::default(),
            handback: ReturnAgreement::default(),
            progress: ProofProgress::default(),
            closure: ClosureFlags::default(),
        }
    }
    /// Returns the content digest together with the encoded record.
    pub fn build(&self) -> anyhow::Result<(String, Vec<u8>)> {
        let cbor = minicbor::to_vec(self)?;
        let hash = sha256::digest(&cbor);

        Ok((hash, cbor))
    }
}

/// Write-through target for [`crate::ExchangeService`].
pub trait LedgerStore: Send + Sync {
    fn save(&self, record: &LoanRecord) -> anyhow::Result<String>;
    fn load_all(&self) -> anyhow::Result<Vec<LoanRecord>>;
}

pub struct LedgerRepository {
    instance: Arc<sled::Db>,
}

impl LedgerRepository {
    pub fn new(instance: Arc<sled::Db>) -> Self {
        Self { instance }
    }

    fn key(loan_id: &str) -> String {
        format!("{LOAN_PREFIX}{loan_id}")
    }

    /// Writes the record and returns its digest.
    pub fn save(&self, record: &LoanRecord) -> anyhow::Result<String> {
        let (hash, cbor) = record.build()?;
        self.instance.insert(Self::key(&record.loan_id).as_bytes(), cbor)?;
        self.instance.flush()?;

        debug!(loan_id = %record.loan_id, digest = %hash, "saved loan record");
        Ok(hash)
    }

    pub fn load(&self, loan_id: &str) -> anyhow::Result<Option<LoanRecord>> {
        match self.instance.get(Self::key(loan_id).as_bytes())? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn load_all(&self) -> anyhow::Result<Vec<LoanRecord>> {
        let mut records = vec![];
        for entry in self.instance.scan_prefix(LOAN_PREFIX.as_bytes()) {
            let (_, bytes) = entry?;
            records.push(minicbor::decode(&bytes)?);
        }
        Ok(records)
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        for key in self.instance.scan_prefix(LOAN_PREFIX.as_bytes()).keys() {
            self.instance.remove(key?)?;
        }
        Ok(())
    }
}

impl LedgerStore for LedgerRepository {
    fn save(&self, record: &LoanRecord) -> anyhow::Result<String> {
        LedgerRepository::save(self, record)
    }

    fn load_all(&self) -> anyhow::Result<Vec<LoanRecord>> {
        LedgerRepository::load_all(self)
    }
}
