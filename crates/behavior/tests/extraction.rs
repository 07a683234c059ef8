use drift_behavior::{BehaviorExtractor, Language};
use drift_protocol::{BehavioralUnit, Condition, ExternalCallRef, Fork, Operation, UnitKind};

fn extract(code: &str, language: Language, path: &str) -> Vec<BehavioralUnit> {
    BehaviorExtractor::new()
        .extract(code, language, path, &Fork::new("cancun"))
        .expect("extraction failed")
}

fn writes(unit: &BehavioralUnit) -> Vec<&str> {
    unit.effects
        .iter()
        .filter(|e| e.operation == Operation::Write)
        .map(|e| e.target.name())
        .collect()
}

#[test]
fn reordering_source_reorders_effects() {
    let forward = r#"
class Chain:
    def apply(self, block):
        self.head = block
        self.height = 1
        self.root = block
"#;
    let reversed = r#"
class Chain:
    def apply(self, block):
        self.root = block
        self.height = 1
        self.head = block
"#;
    let a = extract(forward, Language::Python, "chain.py");
    let b = extract(reversed, Language::Python, "chain.py");
    assert_eq!(writes(&a[0]), vec!["self.head", "self.height", "self.root"]);
    assert_eq!(writes(&b[0]), vec!["self.root", "self.height", "self.head"]);
}

#[test]
fn rust_methods_extract_state_transitions() {
    let code = r#"
pub struct Pool {
    pending: Vec<u64>,
    limit: usize,
}

impl Pool {
    pub fn add(&mut self, tx: u64) -> Result<(), Error> {
        if self.pending.len() >= self.limit {
            return Err(Error::Full);
        }
        self.pending.push(tx);
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.pending.len()
    }
}
"#;
    let units = extract(code, Language::Rust, "src/pool.rs");
    let ids: Vec<_> = units.iter().map(|u| u.id.as_str()).collect();
    assert_eq!(ids, vec!["src/pool.rs::Pool.add", "src/pool.rs::Pool.size"]);

    let add = &units[0];
    assert_eq!(add.kind, UnitKind::StateTransition);
    assert_eq!(writes(add), vec!["self.pending"]);
    assert_eq!(add.preconditions.len(), 1);
    assert_eq!(add.fork.as_str(), "cancun");

    assert_eq!(units[1].kind, UnitKind::Function);
    assert!(!units[1].has_side_effects());
}

#[test]
fn javascript_external_calls_are_recorded() {
    let code = r#"
import { sendRaw } from "./rpc";

export class Relayer {
  relay(tx) {
    sendRaw(tx);
    unknownHelper(tx);
    this.sent += 1;
  }
}
"#;
    let units = extract(code, Language::JavaScript, "relayer.js");
    let unit = &units[0];
    assert_eq!(unit.id, "relayer.js::Relayer.relay");
    let opaque: Vec<_> = unit
        .calls
        .iter()
        .filter(|c| c.opaque)
        .map(|c| c.callee.as_str())
        .collect();
    assert_eq!(opaque, vec!["unknownHelper"]);
    assert!(unit
        .calls
        .iter()
        .any(|c| c.resolved.as_deref() == Some("./rpc.sendRaw")));
    assert_eq!(writes(unit), vec!["this.sent"]);
}

#[test]
fn extract_file_uses_relative_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let nested = dir.path().join("pkg");
    std::fs::create_dir_all(&nested).expect("mkdir");
    let file = nested.join("vault.py");
    std::fs::write(&file, "def drain(state):\n    state.total = 0\n").expect("write");

    let units = BehaviorExtractor::new()
        .extract_file(dir.path(), &file, &Fork::default())
        .expect("extract");
    assert_eq!(units[0].id, "pkg/vault.py::drain");
    assert_eq!(units[0].kind, UnitKind::StateTransition);
}

#[test]
fn checks_inside_loops_survive_collapsing() {
    let code = r#"
class Block:
    def validate(self, txs):
        for tx in txs:
            if tx.gas > self.limit:
                raise ValueError("gas")
        self.valid = True
"#;
    let units = extract(code, Language::Python, "block.py");
    let unit = &units[0];
    assert!(
        unit.effects.iter().any(|e| e.operation == Operation::Branch
            && e.condition == Some(Condition::new("tx.gas > self.limit"))),
        "{:?}",
        unit.effects
    );
    assert_eq!(writes(unit), vec!["self.valid"]);
}

#[test]
fn methods_on_held_handles_are_external_calls() {
    let cases = [
        (
            "class Peer:\n    async def ping(self):\n        await self.client.send(self.nonce)\n",
            Language::Python,
            "peer.py",
            "self.client.send",
        ),
        (
            "impl Peer {\n    fn ping(&self) {\n        self.q.send(self.e);\n    }\n}\n",
            Language::Rust,
            "peer.rs",
            "self.q.send",
        ),
        (
            "class Peer {\n  ping() {\n    this.rpc.send(this.e);\n  }\n}\n",
            Language::JavaScript,
            "peer.js",
            "this.rpc.send",
        ),
    ];
    for (code, language, path, callee) in cases {
        let units = extract(code, language, path);
        let unit = &units[0];
        assert!(
            unit.calls.contains(&ExternalCallRef::opaque(callee)),
            "{path}: {:?}",
            unit.calls
        );
        assert!(unit.has_side_effects(), "{path}");
        assert!(unit
            .effects
            .iter()
            .any(|e| e.operation == Operation::Call && e.target.name() == callee));
    }
}

#[test]
fn container_accessors_stay_reads() {
    let code = r#"
class Ledger:
    def balance_of(self, who):
        return self.balances.get(who)
"#;
    let units = extract(code, Language::Python, "ledger.py");
    assert!(units[0].calls.is_empty());
    assert!(!units[0].has_side_effects());
}

#[test]
fn same_named_units_get_distinct_ids() {
    let code = r#"
struct P(u64);
impl From<u8> for P {
    fn from(v: u8) -> Self { P(v as u64) }
}
impl From<u16> for P {
    fn from(v: u16) -> Self { P(v as u64) }
}
"#;
    let units = extract(code, Language::Rust, "o.rs");
    let ids: Vec<_> = units.iter().map(|u| u.id.as_str()).collect();
    assert_eq!(ids, vec!["o.rs::P.from#4", "o.rs::P.from#7"]);

    let redefined = r#"
class Vault:
    def withdraw(self, amount):
        self.balance -= amount

class Vault:
    def withdraw(self, amount):
        self.balance -= amount
"#;
    let units = extract(redefined, Language::Python, "vault.py");
    let ids: Vec<_> = units.iter().map(|u| u.id.as_str()).collect();
    assert_eq!(ids, vec!["vault.py::Vault.withdraw#3", "vault.py::Vault.withdraw#7"]);
}
