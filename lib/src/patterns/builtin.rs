use crate::patterns::{
    Category, EncodingScheme, FamilySignature, PatternDatabase, PatternEntry,
    Thresholds,
};

type Table = &'static [(&'static str, &'static [&'static str])];

const AUTOEXEC_KEYWORDS: Table = &[
    (
        "Runs when the Word document is opened",
        &["AutoExec", "AutoOpen", "DocumentOpen"],
    ),
    (
        "Runs when the Word document is closed",
        &["AutoExit", "AutoClose", "Document_Close", "DocumentBeforeClose"],
    ),
    ("Runs when the Word document is modified", &["DocumentChange"]),
    (
        "Runs when a new Word document is created",
        &["AutoNew", "Document_New", "NewDocument"],
    ),
    ("Runs when the Word or Publisher document is opened", &["Document_Open"]),
    ("Runs when the Publisher document is closed", &["Document_BeforeClose"]),
    (
        "Runs when the Excel Workbook is opened",
        &["Auto_Open", "Workbook_Open", "Workbook_Activate"],
    ),
    (
        "Runs when the Excel Workbook is closed",
        &["Auto_Close", "Workbook_Close"],
    ),
];

const AUTOEXEC_REGEXES: Table = &[
    (
        "Runs when the file is opened (using InkPicture ActiveX object)",
        &[r"\b\w+_Painted\b", r"\b\w+_Painting\b"],
    ),
    (
        "Runs when the file is opened and ActiveX objects trigger events",
        &[
            r"\b\w+_(?:GotFocus|LostFocus|MouseHover|Click|Change|Resize)\b",
            r"\b\w+_(?:BeforeNavigate2|BeforeScriptExecute|DocumentComplete)\b",
            r"\b\w+_(?:DownloadBegin|DownloadComplete|FileDownload)\b",
            r"\b\w+_(?:NavigateComplete2|NavigateError|ProgressChange)\b",
            r"\b\w+_(?:PropertyChange|SetSecureLockIcon|StatusTextChange)\b",
            r"\b\w+_(?:TitleChange|MouseMove|MouseEnter|MouseLeave|Layout)\b",
            r"\b\w+_(?:OnConnecting|FollowHyperlink|ContentControlOnEnter)\b",
        ],
    ),
];

const SUSPICIOUS_KEYWORDS: Table = &[
    ("May read system environment variables", &["Environ"]),
    ("May open a file", &["Open"]),
    (
        "May write to a file (if combined with Open)",
        &["Write", "Put", "Output", "Print #"],
    ),
    ("May read or write a binary file (if combined with Open)", &["Binary"]),
    (
        "May copy a file",
        &["FileCopy", "CopyFile", "CopyHere", "CopyFolder"],
    ),
    ("May move a file", &["MoveHere", "MoveFile", "MoveFolder"]),
    ("May delete a file", &["Kill"]),
    (
        "May create a text file",
        &["CreateTextFile", "ADODB.Stream", "WriteText", "SaveToFile"],
    ),
    (
        "May run an executable file or a system command",
        &[
            "Shell",
            "vbNormal",
            "vbNormalFocus",
            "vbHide",
            "vbMinimizedFocus",
            "vbMaximizedFocus",
            "vbNormalNoFocus",
            "vbMinimizedNoFocus",
            "WScript.Shell",
            "Run",
            "ShellExecute",
            "ShellExecuteA",
            "shell32",
            "InvokeVerb",
            "InvokeVerbEx",
            "DoIt",
        ],
    ),
    ("May run a dll", &["ControlPanelItem"]),
    ("May execute file or a system command through WMI", &["Create"]),
    (
        "May run an executable file or a system command on a Mac",
        &["MacScript", "AppleScript"],
    ),
    (
        "May run PowerShell commands",
        &[
            "PowerShell",
            "noexit",
            "ExecutionPolicy",
            "noprofile",
            "command",
            "EncodedCommand",
            "invoke-command",
            "scriptblock",
            "Invoke-Expression",
            "AuthorizationManager",
        ],
    ),
    (
        "May run an executable file or a system command using PowerShell",
        &["Start-Process"],
    ),
    ("May call a DLL using Excel 4 Macros (XLM/XLF)", &["CALL"]),
    (
        "May hide the application",
        &["Application.Visible", "ShowWindow", "SW_HIDE"],
    ),
    ("May create a directory", &["MkDir"]),
    ("May save the current workbook", &["ActiveWorkbook.SaveAs"]),
    (
        "May change which directory contains files to open at startup",
        &["Application.AltStartupPath"],
    ),
    ("May create an OLE object", &["CreateObject"]),
    ("May get an OLE object with a running instance", &["GetObject"]),
    ("May create an OLE object using PowerShell", &["New-Object"]),
    (
        "May run an application (if combined with CreateObject)",
        &["Shell.Application"],
    ),
    (
        "May run an Excel 4 Macro (aka XLM/XLF) from VBA",
        &["ExecuteExcel4Macro"],
    ),
    (
        "May enumerate application windows (if combined with Shell.Application object)",
        &["Windows", "FindWindow"],
    ),
    ("May run code from a DLL", &["Lib"]),
    ("May run code from a library on a Mac", &["libc.dylib", "dylib"]),
    (
        "May inject code into another process",
        &[
            "CreateThread",
            "CreateUserThread",
            "VirtualAlloc",
            "VirtualAllocEx",
            "RtlMoveMemory",
            "WriteProcessMemory",
            "SetContextThread",
            "QueueApcThread",
            "WriteVirtualMemory",
            "VirtualProtect",
        ],
    ),
    ("May run a shellcode in memory", &["SetTimer"]),
    (
        "May download files from the Internet",
        &[
            "URLDownloadToFileA",
            "Msxml2.XMLHTTP",
            "Microsoft.XMLHTTP",
            "MSXML2.ServerXMLHTTP",
            "User-Agent",
        ],
    ),
    (
        "May download files from the Internet using PowerShell",
        &["Net.WebClient", "DownloadFile", "DownloadString"],
    ),
    (
        "May control another application by simulating user keystrokes",
        &["SendKeys", "AppActivate"],
    ),
    ("May attempt to obfuscate malicious function calls", &["CallByName"]),
    (
        "May attempt to obfuscate specific strings",
        &["Chr", "ChrB", "ChrW", "StrReverse", "Xor"],
    ),
    (
        "May read or write registry keys",
        &["RegOpenKeyExA", "RegOpenKeyEx", "RegCloseKey"],
    ),
    (
        "May read registry keys",
        &["RegQueryValueExA", "RegQueryValueEx", "RegRead"],
    ),
    (
        "May detect virtualization",
        &[
            r"SYSTEM\ControlSet001\Services\Disk\Enum",
            "VIRTUAL",
            "VMWARE",
            "VBOX",
        ],
    ),
    (
        "May detect Anubis Sandbox",
        &[
            "GetVolumeInformationA",
            "GetVolumeInformation",
            "1824245000",
            r"HKLM\SOFTWARE\Microsoft\Windows NT\CurrentVersion\ProductId",
            "76487-337-8429955-22614",
            "andy",
            "sample",
            r"C:\exec\exec.exe",
            "popupkiller",
        ],
    ),
    (
        "May detect Sandboxie",
        &["SbieDll.dll", "SandboxieControlWndClass"],
    ),
    ("May detect Sunbelt Sandbox", &[r"C:\file.exe"]),
    ("May detect Norman Sandbox", &["currentuser"]),
    ("May detect CW Sandbox", &["Schmidti"]),
    ("May detect WinJail Sandbox", &["Afx:400000:0"]),
    (
        "May attempt to disable VBA macro security and Protected View",
        &[
            "AccessVBOM",
            "VBAWarnings",
            "ProtectedView",
            "DisableAttachementsInPV",
            "DisableInternetFilesInPV",
            "DisableUnsafeLocationsInPV",
            "blockcontentexecutionfrominternet",
        ],
    ),
    (
        "May attempt to modify the VBA code (self-modification)",
        &["VBProject", "VBComponents", "CodeModule", "AddFromString"],
    ),
    (
        "May modify Excel 4 Macro formulas at runtime (XLM/XLF)",
        &["FORMULA.FILL", "FORMULA.ARRAY", "FORMULA"],
    ),
];

const SUSPICIOUS_REGEXES: Table = &[
    (
        "May use Word Document Variables to store and hide data",
        &[r"\.\s*Variables\b"],
    ),
    (
        "May run a shellcode in memory",
        &[
            r"\bEnumSystemLanguageGroupsW?\b",
            r"\bEnumDateFormats(?:W|(?:Ex){1,2})?\b",
        ],
    ),
    (
        "May run an executable file or a system command on a Mac (if combined with libc.dylib)",
        &[r"\bsystem\b", r"\bpopen\s*\("],
    ),
];

const IOC_REGEXES: Table = &[
    (
        "URL",
        &[r"\b(?:https?|ftp)://[a-z0-9\-.]+(?::[0-9]+)?(?:/[a-z0-9\-._?,'/\\+&%$#=~]*)?"],
    ),
    (
        "IPv4 address",
        &[r"\b(?:(?:25[0-5]|2[0-4][0-9]|1[0-9]{2}|[1-9]?[0-9])\.){3}(?:25[0-5]|2[0-4][0-9]|1[0-9]{2}|[1-9]?[0-9])\b"],
    ),
    (
        "E-mail address",
        &[r"\b[a-z0-9._%+\-]+@(?:[a-z0-9\-]+\.)+(?:[a-z]{2,12}|xn--[a-z0-9]{4,18})\b"],
    ),
    (
        "Executable file name",
        &[r"\b\w+\.(?:exe|pif|gadget|msi|msp|msc|vbs|vbe|vb|jse|js|wsf|wsc|wsh|ws|bat|cmd|dll|scr|hta|cpl|class|jar|ps1xml|ps1|ps2xml|ps2|psc1|psc2|scf|lnk|inf|reg)\b"],
    ),
];

fn push_table(
    entries: &mut Vec<PatternEntry>,
    category: Category,
    table: Table,
    regex: bool,
) {
    for (description, patterns) in table {
        for pattern in *patterns {
            entries.push(if regex {
                PatternEntry::regex(category, *pattern, *description)
            } else {
                PatternEntry::keyword(category, *pattern, *description)
            });
        }
    }
}

/// Builds the built-in database.
pub(super) fn database() -> PatternDatabase {
    let mut entries = Vec::new();

    push_table(&mut entries, Category::AutoExec, AUTOEXEC_KEYWORDS, false);
    push_table(&mut entries, Category::AutoExec, AUTOEXEC_REGEXES, true);
    push_table(&mut entries, Category::Suspicious, SUSPICIOUS_KEYWORDS, false);
    push_table(&mut entries, Category::Suspicious, SUSPICIOUS_REGEXES, true);
    push_table(&mut entries, Category::Ioc, IOC_REGEXES, true);

    let families = vec![FamilySignature {
        family: "Dridex".to_string(),
        scheme: EncodingScheme::Dridex,
        description: "Dridex-encoded string".to_string(),
    }];

    PatternDatabase { entries, families, thresholds: Thresholds::default() }
}
