//! The hosted engine: triggers, gas metering and the system-call surface.

use crate::context_state::ContextStateRegistry;
use crate::error::{VmError, VmResult};
use crate::execution_engine::{ExecutionEngine, VMState};
use crate::interop::{IteratorHandle, StorageContext, StorageIterator};
use crate::limits::ExecutionEngineLimits;
use crate::op_code::OpCode;
use crate::script::Script;
use crate::stack_item::StackItem;
use neoxide_core::{Crypto, Snapshot, Transaction, UInt160, WitnessScope};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

/// The mode a script runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TriggerType {
    /// System trigger before block persistence.
    OnPersist = 0x01,
    /// System trigger after block persistence.
    PostPersist = 0x02,
    /// Read-only witness checking.
    Verification = 0x20,
    /// Ordinary transaction execution.
    Application = 0x40,
}

/// Base price of a `System.Crypto.CheckSig` call, before the execution
/// fee factor.
pub const CHECKSIG_PRICE: i64 = 1 << 15;

/// Base price of one key check inside `System.Crypto.CheckMultisig`.
pub const CHECKMULTISIG_PRICE_PER_KEY: i64 = 1 << 15;

/// Base execution price of an opcode, before the execution fee factor.
pub fn opcode_price(opcode: OpCode) -> i64 {
    use OpCode::*;
    match opcode {
        PUSHINT8 | PUSHINT16 | PUSHINT32 | PUSHINT64 | PUSHT | PUSHF | PUSHNULL | PUSHM1
        | PUSH0 | PUSH1 | PUSH2 | PUSH3 | PUSH4 | PUSH5 | PUSH6 | PUSH7 | PUSH8 | PUSH9
        | PUSH10 | PUSH11 | PUSH12 | PUSH13 | PUSH14 | PUSH15 | PUSH16 | NOP | ABORT | ASSERT
        | ABORTMSG | ASSERTMSG => 1 << 0,
        PUSHINT128 | PUSHINT256 | PUSHA | ISNULL | ISTYPE | DEPTH | DROP | NIP | DUP | OVER
        | TUCK | SWAP | ROT | SIGN | ABS | NEGATE | NOT | NZ | SIZE => 1 << 1,
        PUSHDATA1 => 1 << 3,
        PUSHDATA2 => 1 << 9,
        PUSHDATA4 => 1 << 12,
        JMP | JMP_L | JMPIF | JMPIF_L | JMPIFNOT | JMPIFNOT_L | JMPEQ | JMPEQ_L | JMPNE
        | JMPNE_L | JMPGT | JMPGT_L | JMPGE | JMPGE_L | JMPLT | JMPLT_L | JMPLE | JMPLE_L => 1 << 1,
        CALL | CALL_L | CALLA => 1 << 9,
        CALLT => 1 << 15,
        THROW => 1 << 9,
        TRY | TRY_L | ENDTRY | ENDTRY_L | ENDFINALLY => 1 << 2,
        RET | SYSCALL => 0,
        XDROP | CLEAR | PICK | ROLL | REVERSE3 | REVERSE4 | REVERSEN => 1 << 4,
        INITSSLOT => 1 << 4,
        INITSLOT => 1 << 6,
        LDSFLD0 | LDSFLD1 | LDSFLD2 | LDSFLD3 | LDSFLD4 | LDSFLD5 | LDSFLD6 | LDSFLD | STSFLD0
        | STSFLD1 | STSFLD2 | STSFLD3 | STSFLD4 | STSFLD5 | STSFLD6 | STSFLD | LDLOC0 | LDLOC1
        | LDLOC2 | LDLOC3 | LDLOC4 | LDLOC5 | LDLOC6 | LDLOC | STLOC0 | STLOC1 | STLOC2
        | STLOC3 | STLOC4 | STLOC5 | STLOC6 | STLOC | LDARG0 | LDARG1 | LDARG2 | LDARG3
        | LDARG4 | LDARG5 | LDARG6 | LDARG | STARG0 | STARG1 | STARG2 | STARG3 | STARG4
        | STARG5 | STARG6 | STARG => 1 << 1,
        NEWBUFFER => 1 << 8,
        MEMCPY | CAT | SUBSTR | LEFT | RIGHT => 1 << 11,
        INVERT | AND | OR | XOR | INC | DEC | ADD | SUB | MUL | DIV | MOD | SHL | SHR | BOOLAND
        | BOOLOR | NUMEQUAL | NUMNOTEQUAL | LT | LE | GT | GE | MIN | MAX | WITHIN => 1 << 3,
        POW | SQRT | MODMUL => 1 << 6,
        MODPOW => 1 << 11,
        EQUAL | NOTEQUAL => 1 << 5,
        PACKMAP | PACKSTRUCT | PACK | UNPACK => 1 << 11,
        NEWARRAY0 | NEWSTRUCT0 | NEWMAP => 1 << 4,
        NEWARRAY | NEWARRAY_T | NEWSTRUCT => 1 << 9,
        HASKEY | KEYS | REMOVE | CLEARITEMS | POPITEM => 1 << 4,
        VALUES | APPEND | SETITEM | REVERSEITEMS | CONVERT => 1 << 13,
        PICKITEM => 1 << 6,
    }
}

/// An event a contract raised through `System.Runtime.Notify`.
pub struct NotificationEvent {
    /// Hash of the emitting script.
    pub contract: UInt160,
    /// Event name.
    pub name: String,
    /// Event payload.
    pub state: Vec<StackItem>,
}

/// Per-context state recording which deployed contract a frame runs.
struct LoadedContractState {
    hash: UInt160,
}

struct AppState {
    trigger: TriggerType,
    gas_limit: i64,
    gas_consumed: i64,
    exec_fee_factor: i64,
    network: u32,
    snapshot: Option<Arc<dyn Snapshot>>,
    container: Option<Transaction>,
    crypto: Arc<dyn Crypto>,
    notifications: Vec<NotificationEvent>,
    logs: Vec<String>,
    context_states: ContextStateRegistry,
}

impl AppState {
    fn add_gas(&mut self, base_price: i64) -> VmResult<()> {
        let amount = base_price.saturating_mul(self.exec_fee_factor);
        self.gas_consumed = self.gas_consumed.saturating_add(amount);
        if self.gas_consumed > self.gas_limit {
            return Err(VmError::GasExhausted {
                consumed: self.gas_consumed,
                limit: self.gas_limit,
            });
        }
        Ok(())
    }
}

/// An [`ExecutionEngine`] wired with the hosted system calls, a snapshot
/// view and gas accounting. Verification-trigger engines are read-only by
/// construction: no state-mutating service is installed.
pub struct ApplicationEngine {
    engine: ExecutionEngine,
    state: Rc<RefCell<AppState>>,
}

impl ApplicationEngine {
    /// Creates a hosted engine.
    pub fn new(
        trigger: TriggerType,
        snapshot: Option<Arc<dyn Snapshot>>,
        gas_limit: i64,
        network: u32,
        exec_fee_factor: i64,
        crypto: Arc<dyn Crypto>,
    ) -> Self {
        let state = Rc::new(RefCell::new(AppState {
            trigger,
            gas_limit,
            gas_consumed: 0,
            exec_fee_factor: exec_fee_factor.max(1),
            network,
            snapshot,
            container: None,
            crypto,
            notifications: Vec::new(),
            logs: Vec::new(),
            context_states: ContextStateRegistry::new(),
        }));
        let mut engine = ExecutionEngine::with_limits(ExecutionEngineLimits::default());
        engine.set_host(state.clone());
        register_syscalls(&mut engine);
        Self { engine, state }
    }

    /// Attaches the transaction whose witnesses sign this execution.
    pub fn set_container(&mut self, transaction: Transaction) {
        self.state.borrow_mut().container = Some(transaction);
    }

    /// The underlying engine.
    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    /// The underlying engine, mutably.
    pub fn engine_mut(&mut self) -> &mut ExecutionEngine {
        &mut self.engine
    }

    /// Loads a script as a fresh context.
    pub fn load_script(&mut self, script: Script, rvcount: i32, position: usize) -> VmResult<()> {
        self.engine.load_script(script, rvcount, position)
    }

    /// Loads raw bytecode as a fresh context.
    pub fn load_script_bytes(&mut self, bytes: &[u8]) -> VmResult<()> {
        self.load_script(Script::new(bytes.to_vec()), -1, 0)
    }

    /// Loads a witness pair: the verification script as the entry context
    /// and the invocation script on top of it.
    pub fn load_witness(&mut self, verification: &[u8], invocation: &[u8]) -> VmResult<()> {
        self.load_script(Script::new(verification.to_vec()), -1, 0)?;
        self.load_script(Script::new(invocation.to_vec()), -1, 0)
    }

    /// The trigger this engine runs under.
    pub fn trigger(&self) -> TriggerType {
        self.state.borrow().trigger
    }

    /// Gas consumed so far, in datoshi.
    pub fn gas_consumed(&self) -> i64 {
        self.state.borrow().gas_consumed
    }

    /// The engine state.
    pub fn state(&self) -> VMState {
        self.engine.state()
    }

    /// Notifications raised during execution.
    pub fn notifications(&self) -> std::cell::Ref<'_, Vec<NotificationEvent>> {
        std::cell::Ref::map(self.state.borrow(), |s| &s.notifications)
    }

    /// Log lines raised during execution.
    pub fn logs(&self) -> Vec<String> {
        self.state.borrow().logs.clone()
    }

    /// Runs to completion, charging gas per instruction.
    pub fn execute(&mut self) -> VMState {
        loop {
            match self.engine.state() {
                VMState::Halt | VMState::Fault => break,
                VMState::Break | VMState::None => {}
            }
            if let Some(instruction) = self.engine.peek_instruction() {
                let price = opcode_price(instruction.opcode);
                let charged = self.state.borrow_mut().add_gas(price);
                if let Err(error) = charged {
                    self.engine.fault(error);
                    break;
                }
            }
            self.engine.execute_next();
        }
        self.engine.state()
    }

    /// Result stack snapshot, bottom first.
    pub fn result_items(&self) -> Vec<StackItem> {
        self.engine.result_stack().to_vec()
    }

    /// The fault that stopped the engine, if any.
    pub fn fault_error(&self) -> Option<&VmError> {
        self.engine.fault_error()
    }

    /// The uncaught exception, if the fault came from a `THROW`.
    pub fn uncaught_exception(&self) -> Option<&StackItem> {
        self.engine.uncaught_exception()
    }
}

fn app_state(engine: &ExecutionEngine) -> VmResult<Rc<RefCell<AppState>>> {
    engine.host::<RefCell<AppState>>()
}

fn charge(engine: &ExecutionEngine, base_price: i64) -> VmResult<()> {
    app_state(engine)?.borrow_mut().add_gas(base_price)
}

fn current_script_hash(engine: &ExecutionEngine) -> VmResult<UInt160> {
    let state = app_state(engine)?;
    let context_id = engine.current_context()?.id();
    if let Some(loaded) = state.borrow().context_states.get::<LoadedContractState>(context_id) {
        return Ok(loaded.hash);
    }
    let crypto = state.borrow().crypto.clone();
    let script = engine.current_context()?.script().as_bytes().to_vec();
    Ok(crypto.hash160(&script))
}

/// The single-signature verification script for a compressed public key.
pub fn single_sig_verification_script(public_key: &[u8]) -> Vec<u8> {
    let mut script = Vec::with_capacity(40);
    script.push(OpCode::PUSHDATA1.as_byte());
    script.push(public_key.len() as u8);
    script.extend_from_slice(public_key);
    script.push(OpCode::SYSCALL.as_byte());
    script.extend_from_slice(
        &crate::execution_engine::syscall_hash("System.Crypto.CheckSig").to_le_bytes(),
    );
    script
}

fn register_syscalls(engine: &mut ExecutionEngine) {
    engine.register_syscall("System.Runtime.Platform", |engine| {
        charge(engine, 1 << 3)?;
        engine.push(StackItem::from_bytes(b"NEO".to_vec()))
    });

    engine.register_syscall("System.Runtime.GetTrigger", |engine| {
        charge(engine, 1 << 3)?;
        let trigger = app_state(engine)?.borrow().trigger;
        engine.push(StackItem::from_int(trigger as u8))
    });

    engine.register_syscall("System.Runtime.GetNetwork", |engine| {
        charge(engine, 1 << 3)?;
        let network = app_state(engine)?.borrow().network;
        engine.push(StackItem::from_int(network))
    });

    engine.register_syscall("System.Runtime.GasLeft", |engine| {
        charge(engine, 1 << 4)?;
        let state = app_state(engine)?;
        let left = {
            let s = state.borrow();
            s.gas_limit - s.gas_consumed
        };
        engine.push(StackItem::from_int(left))
    });

    engine.register_syscall("System.Runtime.Log", |engine| {
        charge(engine, 1 << 15)?;
        let message = engine.pop_bytes()?;
        let text = String::from_utf8_lossy(&message).into_owned();
        log::info!(target: "contract", "{text}");
        app_state(engine)?.borrow_mut().logs.push(text);
        Ok(())
    });

    engine.register_syscall("System.Runtime.Notify", |engine| {
        charge(engine, 1 << 15)?;
        let name = engine.pop_bytes()?;
        let state_item = engine.pop()?;
        let items = match state_item.compound_handle() {
            Some(handle) => engine.reference_counter().seq_items(handle)?,
            None => {
                return Err(VmError::syscall(
                    "System.Runtime.Notify",
                    "notification state must be an array",
                ))
            }
        };
        let contract = current_script_hash(engine)?;
        app_state(engine)?
            .borrow_mut()
            .notifications
            .push(NotificationEvent {
                contract,
                name: String::from_utf8_lossy(&name).into_owned(),
                state: items,
            });
        Ok(())
    });

    engine.register_syscall("System.Runtime.CheckWitness", |engine| {
        charge(engine, 1 << 10)?;
        let account_bytes = engine.pop_bytes()?;
        let state = app_state(engine)?;
        let (crypto, container) = {
            let s = state.borrow();
            (s.crypto.clone(), s.container.clone())
        };
        let account = match account_bytes.len() {
            20 => UInt160::from_slice(&account_bytes)
                .map_err(|e| VmError::syscall("System.Runtime.CheckWitness", e.to_string()))?,
            33 => crypto.hash160(&single_sig_verification_script(&account_bytes)),
            other => {
                return Err(VmError::syscall(
                    "System.Runtime.CheckWitness",
                    format!("account must be 20 or 33 bytes, got {other}"),
                ))
            }
        };
        let Some(container) = container else {
            return engine.push(StackItem::Boolean(false));
        };
        let current = current_script_hash(engine)?;
        let witnessed = container.signers.iter().any(|signer| {
            if signer.account != account {
                return false;
            }
            if signer.scopes.contains(WitnessScope::GLOBAL) {
                return true;
            }
            if signer.scopes.contains(WitnessScope::CUSTOM_CONTRACTS)
                && signer.allowed_contracts.contains(&current)
            {
                return true;
            }
            // CalledByEntry: valid in the entry script and in contracts it
            // calls directly.
            signer.scopes.contains(WitnessScope::CALLED_BY_ENTRY)
                && engine.invocation_depth() <= 2
        });
        engine.push(StackItem::Boolean(witnessed))
    });

    engine.register_syscall("System.Crypto.CheckSig", |engine| {
        charge(engine, CHECKSIG_PRICE)?;
        let public_key = engine.pop_bytes()?;
        let signature = engine.pop_bytes()?;
        let state = app_state(engine)?;
        let (crypto, sign_data) = {
            let s = state.borrow();
            let container = s.container.as_ref().ok_or_else(|| {
                VmError::syscall("System.Crypto.CheckSig", "no script container attached")
            })?;
            (s.crypto.clone(), container.sign_data(s.network))
        };
        let valid = crypto.verify_signature(&sign_data, &signature, &public_key);
        engine.push(StackItem::Boolean(valid))
    });

    engine.register_syscall("System.Crypto.CheckMultisig", |engine| {
        let public_keys_item = engine.pop()?;
        let signatures_item = engine.pop()?;
        let rc = engine.reference_counter();
        let key_handle = public_keys_item.compound_handle().ok_or_else(|| {
            VmError::syscall("System.Crypto.CheckMultisig", "public keys must be an array")
        })?;
        let sig_handle = signatures_item.compound_handle().ok_or_else(|| {
            VmError::syscall("System.Crypto.CheckMultisig", "signatures must be an array")
        })?;
        let keys: Vec<Vec<u8>> = rc
            .seq_items(key_handle)?
            .iter()
            .map(|item| item.to_byte_slice())
            .collect::<VmResult<_>>()?;
        let signatures: Vec<Vec<u8>> = rc
            .seq_items(sig_handle)?
            .iter()
            .map(|item| item.to_byte_slice())
            .collect::<VmResult<_>>()?;
        charge(
            engine,
            CHECKMULTISIG_PRICE_PER_KEY.saturating_mul(keys.len().max(1) as i64),
        )?;
        if signatures.is_empty() || keys.is_empty() || signatures.len() > keys.len() || keys.len() > 1024
        {
            return Err(VmError::syscall(
                "System.Crypto.CheckMultisig",
                "invalid key or signature counts",
            ));
        }
        let state = app_state(engine)?;
        let (crypto, sign_data) = {
            let s = state.borrow();
            let container = s.container.as_ref().ok_or_else(|| {
                VmError::syscall("System.Crypto.CheckMultisig", "no script container attached")
            })?;
            (s.crypto.clone(), container.sign_data(s.network))
        };
        let mut key_index = 0usize;
        let mut matched = 0usize;
        for signature in &signatures {
            while key_index < keys.len() {
                if crypto.verify_signature(&sign_data, signature, &keys[key_index]) {
                    matched += 1;
                    key_index += 1;
                    break;
                }
                key_index += 1;
            }
        }
        engine.push(StackItem::Boolean(matched == signatures.len()))
    });

    engine.register_syscall("System.Storage.GetContext", |engine| {
        charge(engine, 1 << 4)?;
        let contract = current_script_hash(engine)?;
        let read_only = app_state(engine)?.borrow().trigger == TriggerType::Verification;
        engine.push(StackItem::InteropInterface(Rc::new(StorageContext {
            contract,
            read_only,
        })))
    });

    engine.register_syscall("System.Storage.GetReadOnlyContext", |engine| {
        charge(engine, 1 << 4)?;
        let contract = current_script_hash(engine)?;
        engine.push(StackItem::InteropInterface(Rc::new(StorageContext {
            contract,
            read_only: true,
        })))
    });

    engine.register_syscall("System.Storage.Get", |engine| {
        charge(engine, 1 << 15)?;
        let context_item = engine.pop()?;
        let context = context_item.as_interop::<StorageContext>()?.clone();
        let key = engine.pop_bytes()?;
        let snapshot = app_state(engine)?
            .borrow()
            .snapshot
            .clone()
            .ok_or_else(|| VmError::syscall("System.Storage.Get", "no snapshot attached"))?;
        match snapshot.storage(&context.contract, &key) {
            Some(value) => engine.push(StackItem::ByteString(value)),
            None => engine.push(StackItem::Null),
        }
    });

    engine.register_syscall("System.Storage.Find", |engine| {
        charge(engine, 1 << 15)?;
        let context_item = engine.pop()?;
        let context = context_item.as_interop::<StorageContext>()?.clone();
        let prefix = engine.pop_bytes()?;
        let _options = engine.pop_int()?;
        let snapshot = app_state(engine)?
            .borrow()
            .snapshot
            .clone()
            .ok_or_else(|| VmError::syscall("System.Storage.Find", "no snapshot attached"))?;
        let entries = snapshot.find_storage(&context.contract, &prefix);
        engine.push(StackItem::InteropInterface(Rc::new(IteratorHandle::new(
            Box::new(StorageIterator::new(entries)),
        ))))
    });

    engine.register_syscall("System.Iterator.Next", |engine| {
        charge(engine, 1 << 15)?;
        let item = engine.pop()?;
        let advanced = item.as_interop::<IteratorHandle>()?.advance();
        engine.push(StackItem::Boolean(advanced))
    });

    engine.register_syscall("System.Iterator.Value", |engine| {
        charge(engine, 1 << 4)?;
        let item = engine.pop()?;
        let rc = engine.reference_counter();
        let value = item.as_interop::<IteratorHandle>()?.current(&rc);
        engine.push(value)
    });

    engine.register_syscall("System.Contract.Call", |engine| {
        charge(engine, 1 << 15)?;
        let hash_bytes = engine.pop_bytes()?;
        let method_bytes = engine.pop_bytes()?;
        let _call_flags = engine.pop_int()?;
        let args_item = engine.pop()?;

        let hash = UInt160::from_slice(&hash_bytes)
            .map_err(|e| VmError::syscall("System.Contract.Call", e.to_string()))?;
        let method = String::from_utf8_lossy(&method_bytes).into_owned();
        if method.starts_with('_') {
            return Err(VmError::syscall(
                "System.Contract.Call",
                "reserved method name",
            ));
        }
        let args = match args_item.compound_handle() {
            Some(handle) => engine.reference_counter().seq_items(handle)?,
            None => {
                return Err(VmError::syscall(
                    "System.Contract.Call",
                    "arguments must be an array",
                ))
            }
        };

        let state = app_state(engine)?;
        let (snapshot, trigger) = {
            let s = state.borrow();
            (s.snapshot.clone(), s.trigger)
        };
        let snapshot = snapshot
            .ok_or_else(|| VmError::syscall("System.Contract.Call", "no snapshot attached"))?;
        let contract = snapshot.contract(&hash).ok_or_else(|| {
            VmError::syscall("System.Contract.Call", format!("unknown contract {hash}"))
        })?;
        let descriptor = contract
            .manifest
            .method(&method, args.len())
            .ok_or_else(|| {
                VmError::syscall(
                    "System.Contract.Call",
                    format!("method {method} with {} parameters not found", args.len()),
                )
            })?;
        if trigger == TriggerType::Verification && !descriptor.safe && method != "verify" {
            return Err(VmError::syscall(
                "System.Contract.Call",
                "only safe methods are callable during verification",
            ));
        }

        let offset = descriptor.offset;
        engine.load_script(Script::new(contract.script.clone()), -1, offset)?;
        // The callee frame reports the deployed hash, not a hash of its
        // bytes, through the per-context state table.
        let callee_id = engine.current_context()?.id();
        state.borrow().context_states.get_or_insert_with(callee_id, || LoadedContractState {
            hash: contract.hash,
        });
        // Argument zero ends on top of the callee stack.
        for argument in args.into_iter().rev() {
            engine.push(argument)?;
        }
        Ok(())
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script_builder::ScriptBuilder;
    use neoxide_core::StdCrypto;

    fn app_engine(gas_limit: i64) -> ApplicationEngine {
        ApplicationEngine::new(
            TriggerType::Application,
            None,
            gas_limit,
            0x334f454e,
            1,
            Arc::new(StdCrypto),
        )
    }

    #[test]
    fn test_gas_metering_halts_greedy_script() {
        // An infinite loop must exhaust gas rather than hang.
        let mut builder = ScriptBuilder::new();
        builder.emit_jump(OpCode::JMP_L, 0).unwrap();
        let mut engine = app_engine(10_000);
        engine.load_script(builder.to_script(), -1, 0).unwrap();
        assert_eq!(engine.execute(), VMState::Fault);
        assert!(matches!(
            engine.fault_error(),
            Some(VmError::GasExhausted { .. })
        ));
    }

    #[test]
    fn test_platform_syscall() {
        let mut builder = ScriptBuilder::new();
        builder.emit_syscall("System.Runtime.Platform");
        builder.emit(OpCode::RET);
        let mut engine = app_engine(1_000_000);
        engine.load_script(builder.to_script(), -1, 0).unwrap();
        assert_eq!(engine.execute(), VMState::Halt);
        let result = engine.result_items();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].to_byte_slice().unwrap(), b"NEO");
    }

    #[test]
    fn test_trigger_syscall_reports_mode() {
        let mut builder = ScriptBuilder::new();
        builder.emit_syscall("System.Runtime.GetTrigger");
        let mut engine = ApplicationEngine::new(
            TriggerType::Verification,
            None,
            1_000_000,
            0,
            1,
            Arc::new(StdCrypto),
        );
        engine.load_script(builder.to_script(), -1, 0).unwrap();
        assert_eq!(engine.execute(), VMState::Halt);
        assert_eq!(
            engine.result_items()[0].to_int().unwrap(),
            (TriggerType::Verification as u8).into()
        );
    }

    #[test]
    fn test_gas_consumed_accumulates() {
        let mut builder = ScriptBuilder::new();
        builder.emit_push_int(1).unwrap();
        builder.emit_push_int(2).unwrap();
        builder.emit(OpCode::ADD);
        let mut engine = app_engine(1_000_000);
        engine.load_script(builder.to_script(), -1, 0).unwrap();
        assert_eq!(engine.execute(), VMState::Halt);
        // Two pushes at 1 and an ADD at 8, with fee factor 1.
        assert_eq!(engine.gas_consumed(), 1 + 1 + (1 << 3));
    }
}
